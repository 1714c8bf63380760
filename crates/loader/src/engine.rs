// Archivo: engine.rs
// Propósito: implementar `DashboardLoader`, la tubería sincrónica que
// normaliza eventos crudos, resuelve claves foráneas con cache, acumula
// lotes y los comitea con degradación ante conflictos y recuperación ante
// pérdida de conexión.
use crate::errors::{LoadError, Result};
use crate::repository::DashboardRepository;
use crate::resolver::FkCache;
use dash_domain::{normalize, Normalized, RawEvent, WorkflowHostMap, WorkflowRecord, WorkflowState, WorkflowStateRecord};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Tags de wire reconocidos. Conjunto cerrado de tres valores.
pub const EVENT_WORKFLOW_PLAN: &str = "dashboard.wf.plan";
pub const EVENT_WORKFLOW_START: &str = "dashboard.xwf.start";
pub const EVENT_WORKFLOW_END: &str = "dashboard.xwf.end";

/// Tipos de evento reconocidos por la tubería. El despacho es un match
/// explícito sobre este enum cerrado: añadir un tipo nuevo es añadir un
/// handler, no configuración.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    WorkflowPlan,
    WorkflowStart,
    WorkflowEnd,
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            EVENT_WORKFLOW_PLAN => Some(EventKind::WorkflowPlan),
            EVENT_WORKFLOW_START => Some(EventKind::WorkflowStart),
            EVENT_WORKFLOW_END => Some(EventKind::WorkflowEnd),
            _ => None,
        }
    }
}

/// Configuración de la tubería de carga.
///
/// `flush_every` y `flush_interval` sólo aplican con `batch` activo. El
/// par `reconnect_pause`/`max_reconnect_attempts` acota la recuperación de
/// conexión: agotados los intentos, la operación en curso falla con
/// `LoadError::Connection`.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch: bool,
    pub perf: bool,
    pub flush_every: usize,
    pub flush_interval: Duration,
    pub reconnect_pause: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch: false,
               perf: false,
               flush_every: 1,
               flush_interval: Duration::from_secs(30),
               reconnect_pause: Duration::from_secs(5),
               max_reconnect_attempts: 5 }
    }
}

/// Contadores de instrumentación opcional (flag perf).
#[derive(Debug)]
struct PerfCounters {
    insert_time: Duration,
    insert_num: u64,
    started: Instant,
}

/// Colas de eventos pendientes cuando el batching está activo. Se vacían
/// de forma atómica como último paso de un flush exitoso.
#[derive(Debug, Default)]
struct BatchBuffer {
    inserts: Vec<WorkflowStateRecord>,
    updates: Vec<WorkflowRecord>,
    host_maps: Vec<WorkflowHostMap>,
}

impl BatchBuffer {
    fn clear(&mut self) {
        self.inserts.clear();
        self.updates.clear();
        self.host_maps.clear();
    }
}

/// Tubería de carga de eventos de ciclo de vida de workflows.
///
/// Ejecución monohilo y sincrónica: un único flujo de control procesa los
/// registros uno a uno en orden de llegada. El único punto de suspensión
/// es la pausa bloqueante durante la recuperación de conexión.
pub struct DashboardLoader<R>
    where R: DashboardRepository
{
    repo: Arc<R>,
    config: LoaderConfig,
    /// Caches de resolución FK, disjuntas, invalidadas por evento terminal.
    wf_ids: FkCache,
    root_ids: FkCache,
    buffer: BatchBuffer,
    last_flush: Instant,
    perf: Option<PerfCounters>,
}

impl<R> DashboardLoader<R> where R: DashboardRepository
{
    pub fn new(repo: Arc<R>, config: LoaderConfig) -> Self {
        let perf = if config.perf {
            Some(PerfCounters { insert_time: Duration::ZERO, insert_num: 0, started: Instant::now() })
        } else {
            None
        };
        Self { repo,
               config,
               wf_ids: FkCache::new(),
               root_ids: FkCache::new(),
               buffer: BatchBuffer::default(),
               last_flush: Instant::now(),
               perf }
    }

    /// Procesa un registro crudo: lo despacha al handler de su tipo de
    /// evento y después ejecuta la comprobación de flush. Ningún error de
    /// régimen permanente aborta la tubería; todos se reportan y el
    /// registro siguiente se procesa con normalidad.
    pub fn process(&mut self, raw: &RawEvent) {
        debug!("process: {:?}", raw);

        if !self.config.batch {
            if let Err(e) = self.ensure_connected() {
                error!("Could not restore the connection: {} - dropping record", e);
                return;
            }
        }

        let tag = raw.event().unwrap_or("");
        match EventKind::from_tag(tag) {
            Some(kind) => self.dispatch_with_retry(kind, raw),
            None => error!("no handler for event type \"{}\" defined", tag),
        }

        self.check_flush();
    }

    /// Despacha el registro; ante una pérdida de conexión recupera y
    /// reintenta el mismo registro una única vez. Si el reintento vuelve a
    /// fallar el registro se descarta con log, nunca en silencio.
    fn dispatch_with_retry(&mut self, kind: EventKind, raw: &RawEvent) {
        for attempt in 1..=2u32 {
            let started = Instant::now();
            match self.dispatch(kind, raw) {
                Ok(()) => {
                    if let Some(perf) = self.perf.as_mut() {
                        perf.insert_time += started.elapsed();
                        perf.insert_num += 1;
                    }
                    return;
                }
                Err(LoadError::Integrity(e)) => {
                    error!("Insert failed for event \"{}\": {}", raw.event().unwrap_or(""), e);
                    return;
                }
                Err(LoadError::Connection(e)) => {
                    error!("Connection seemingly lost - attempting to refresh: {}", e);
                    if attempt == 2 {
                        error!("Retry after reconnect failed as well - dropping record");
                        return;
                    }
                    if let Err(e) = self.ensure_connected() {
                        error!("Could not restore the connection: {} - dropping record", e);
                        return;
                    }
                }
                Err(e) => {
                    error!("Handler error for event \"{}\": {}", raw.event().unwrap_or(""), e);
                    return;
                }
            }
        }
    }

    fn dispatch(&mut self, kind: EventKind, raw: &RawEvent) -> Result<()> {
        match kind {
            EventKind::WorkflowPlan => self.handle_workflow(raw),
            EventKind::WorkflowStart => self.handle_workflow_state(raw, WorkflowState::Started),
            EventKind::WorkflowEnd => self.handle_workflow_state(raw, WorkflowState::Terminated),
        }
    }

    /// Handler del evento de creación (plan) de un workflow.
    fn handle_workflow(&mut self, raw: &RawEvent) -> Result<()> {
        let Normalized { record: mut wf, .. } = normalize::<WorkflowRecord>(raw);
        debug!("workflow: {:?}", wf);

        wf.timestamp = wf.ts;

        // la fila del workflow se escribe siempre de inmediato, con o sin
        // batching: los eventos de estado posteriores resuelven su id
        // contra la fila ya persistida
        let wf_id = self.repo.insert_workflow(&wf)?;
        wf.wf_id = Some(wf_id);

        // backfill del root id en un segundo commit inmediato; un workflow
        // sin root explícito es su propia raíz
        let root_uuid = wf.root_xwf_id.clone().unwrap_or_else(|| wf.wf_uuid.clone());
        let repo = Arc::clone(&self.repo);
        let root_wf_id = self.wf_ids.resolve(&root_uuid, "wf_id", |u| repo.workflow_id_by_uuid(u))?;
        match root_wf_id {
            Some(root_id) => {
                self.repo.set_root_workflow(wf_id, root_id)?;
                wf.root_wf_id = Some(root_id);
            }
            None => warn!("Could not determine root_wf_id for workflow {}", wf.wf_uuid),
        }
        Ok(())
    }

    /// Handler compartido de los eventos de transición de estado.
    fn handle_workflow_state(&mut self, raw: &RawEvent, state: WorkflowState) -> Result<()> {
        let Normalized { record: mut wfs, .. } = normalize::<WorkflowStateRecord>(raw);
        debug!("workflowstate: {:?}", wfs);

        let repo = Arc::clone(&self.repo);
        wfs.wf_id = self.wf_ids.resolve(&wfs.wf_uuid, "wf_id", |u| repo.workflow_id_by_uuid(u))?;
        wfs.timestamp = wfs.ts;
        wfs.state = Some(state);

        if self.config.batch {
            self.buffer.inserts.push(wfs);
        } else {
            // una FK sin resolver se deja en null; la constraint del
            // esquema decide el destino de la fila
            self.repo.insert_state(&wfs)?;
            if wfs.is_terminal() {
                self.invalidate_caches(&wfs.wf_uuid);
            }
        }
        Ok(())
    }

    /// Resuelve el root id de un workflow usando la cache de root ids.
    /// Pensado para los caminos de ingesta hermanos que pueblan las colas
    /// de updates y host maps.
    pub fn resolve_root_id(&mut self, wf_uuid: &str) -> Result<Option<i64>> {
        let repo = Arc::clone(&self.repo);
        self.root_ids.resolve(wf_uuid, "root_wf_id", |u| repo.root_id_by_uuid(u))
    }

    /// Encola un merge de workflow (o lo ejecuta de inmediato sin batching).
    pub fn enqueue_update(&mut self, wf: WorkflowRecord) -> Result<()> {
        if self.config.batch {
            self.buffer.updates.push(wf);
            Ok(())
        } else {
            self.repo.merge_workflow(&wf)
        }
    }

    /// Encola una asociación workflow -> host (o la escribe de inmediato).
    pub fn enqueue_host_map(&mut self, map: WorkflowHostMap) -> Result<()> {
        if self.config.batch {
            self.buffer.host_maps.push(map);
            Ok(())
        } else {
            self.repo.insert_host_map(&map)
        }
    }

    /// Comprobación de flush, ejecutada tras cada registro procesado:
    /// dispara por umbral de cola o, en su defecto, por tiempo desde el
    /// último flush (staleness acotada bajo tasas de eventos bajas).
    fn check_flush(&mut self) {
        if !self.config.batch {
            return;
        }

        if self.buffer.inserts.len() >= self.config.flush_every {
            if let Err(e) = self.hard_flush() {
                error!("Flush failed: {}", e);
                return;
            }
            debug!("Flush: flush count");
            return;
        }

        if self.last_flush.elapsed() > self.config.flush_interval {
            if let Err(e) = self.hard_flush() {
                error!("Flush failed: {}", e);
                return;
            }
            debug!("Flush: time based");
        }
    }

    /// Comitea las colas pendientes. Primero intenta un commit en bloque;
    /// ante una violación de integridad degrada a commits individuales
    /// para que los registros válidos del lote contaminado persistan
    /// igualmente. Ante una pérdida de conexión recupera y reintenta el
    /// flush completo desde el principio.
    pub fn hard_flush(&mut self) -> Result<()> {
        if !self.config.batch {
            return Ok(());
        }
        debug!("Hard flush");

        self.ensure_connected()?;

        let started = Instant::now();

        loop {
            match self.repo.commit_batch(&self.buffer.inserts, &self.buffer.updates) {
                Ok(()) => break,
                Err(LoadError::Integrity(e)) => {
                    error!("Integrity error on batch flush: {} - batch will need to be committed per-event which will \
                            take longer",
                           e);
                    self.individual_flush();
                    break;
                }
                Err(LoadError::Connection(e)) => {
                    error!("Connection problem during commit: {} - reattempting batch", e);
                    self.ensure_connected()?;
                }
                Err(e) => return Err(e),
            }
        }

        // segunda pasada: asociaciones host, cada una durable por sí misma
        for map in &self.buffer.host_maps {
            if let Err(e) = self.repo.insert_host_map(map) {
                error!("Insert failed for host map {}: {}", map.host, e);
            }
        }

        let ended: Vec<String> = self.buffer
                                     .inserts
                                     .iter()
                                     .filter(|s| s.is_terminal())
                                     .map(|s| s.wf_uuid.clone())
                                     .collect();
        for wf_uuid in &ended {
            self.invalidate_caches(wf_uuid);
        }

        // vaciar las tres colas en bloque y resetear el estado de flush
        self.buffer.clear();
        self.last_flush = Instant::now();

        if self.perf.is_some() {
            info!("Hard flush duration: {:.6}", started.elapsed().as_secs_f64());
        }
        Ok(())
    }

    /// Camino degradado del flush: cada insert y cada merge se comitea por
    /// separado; sólo los registros genuinamente conflictivos se pierden.
    fn individual_flush(&self) {
        for event in &self.buffer.inserts {
            if let Err(e) = self.repo.insert_state(event) {
                error!("Insert failed for state event {}: {}", event.wf_uuid, e);
            }
        }
        for wf in &self.buffer.updates {
            if let Err(e) = self.repo.merge_workflow(wf) {
                error!("Merge failed for workflow {}: {}", wf.wf_uuid, e);
            }
        }
    }

    /// Verifica la salud de la conexión y, si está muerta, la recupera con
    /// un bucle acotado de reintentos con pausa creciente. Agotados los
    /// intentos devuelve `LoadError::Connection` al caller.
    pub fn ensure_connected(&self) -> Result<()> {
        debug!("Checking connection");
        if self.repo.probe().is_ok() {
            return Ok(());
        }

        error!("Lost connection - attempting reconnect");
        let mut pause = self.config.reconnect_pause;
        for attempt in 1..=self.config.max_reconnect_attempts {
            thread::sleep(pause);
            match self.repo.reconnect() {
                Ok(()) => {
                    warn!("Connection re-established");
                    return Ok(());
                }
                Err(e) => {
                    error!("Reconnect attempt {}/{} failed: {}",
                           attempt, self.config.max_reconnect_attempts, e);
                    pause = pause.saturating_mul(2);
                }
            }
        }
        Err(LoadError::Connection(format!("sin conexión tras {} intentos", self.config.max_reconnect_attempts)))
    }

    fn invalidate_caches(&mut self, wf_uuid: &str) {
        debug!("Flushing caches for: {}", wf_uuid);
        self.wf_ids.invalidate(wf_uuid);
        self.root_ids.invalidate(wf_uuid);
    }

    /// Cierre ordenado: flush final forzado si hay batching, liberación de
    /// la conexión y, con perf activo, reporte de contadores agregados.
    pub fn finish(&mut self) -> Result<()> {
        if self.config.batch {
            info!("Executing final flush");
            self.hard_flush()?;
        }
        self.repo.close()?;
        if let Some(perf) = &self.perf {
            let run_time = perf.started.elapsed().as_secs_f64();
            let insert_time = perf.insert_time.as_secs_f64();
            let mean = if perf.insert_num > 0 { insert_time / perf.insert_num as f64 } else { 0.0 };
            info!("Loader performance: insert_time={:.6}, insert_num={}, total_time={:.6}, run_time_delta={:.6}, \
                   mean_time={:.6}",
                  insert_time,
                  perf.insert_num,
                  run_time,
                  run_time - insert_time,
                  mean);
        }
        Ok(())
    }

    // --- Accesores de inspección (pruebas y reporting) ---

    pub fn wf_id_cache(&self) -> &FkCache {
        &self.wf_ids
    }

    pub fn root_id_cache(&self) -> &FkCache {
        &self.root_ids
    }

    pub fn queued_inserts(&self) -> usize {
        self.buffer.inserts.len()
    }

    pub fn queued_updates(&self) -> usize {
        self.buffer.updates.len()
    }

    pub fn queued_host_maps(&self) -> usize {
        self.buffer.host_maps.len()
    }
}
