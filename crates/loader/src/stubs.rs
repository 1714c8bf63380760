// Archivo: stubs.rs
// Propósito: implementación en memoria del repositorio para pruebas y
// wiring rápido. No es durable; añade inyección de fallos de conexión y
// contadores de consultas para poder ejercitar la tubería completa sin
// base de datos.
use crate::errors::{LoadError, Result};
use crate::repository::{DashboardRepository, Resolution};
use dash_domain::{WorkflowHostMap, WorkflowRecord, WorkflowStateRecord};
use std::sync::{Mutex, MutexGuard};

/// Fila de workflow almacenada junto a su id interno asignado.
#[derive(Debug, Clone)]
pub struct StoredWorkflow {
    pub wf_id: i64,
    pub record: WorkflowRecord,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: i64,
    workflows: Vec<StoredWorkflow>,
    states: Vec<WorkflowStateRecord>,
    host_maps: Vec<WorkflowHostMap>,
    /// Consultas de resolución FK servidas por el "almacenamiento".
    lookups: u64,
    /// Fallos de conexión inyectados pendientes de consumir.
    faults: u32,
    /// La conexión quedó cortada por el último fallo.
    broken: bool,
    reconnect_faults: u32,
    reconnects: u32,
    closed: bool,
}

// Minimal in-memory repository for pipeline tests (not durable)
#[derive(Debug, Default)]
pub struct InMemoryDashboardRepository {
    inner: Mutex<StoreInner>,
}

impl InMemoryDashboardRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hace fallar las próximas `n` operaciones con un error de conexión;
    /// cada fallo deja la conexión cortada hasta el siguiente reconnect.
    pub fn inject_connection_faults(&self, n: u32) {
        self.lock().faults = n;
    }

    /// Hace fallar los próximos `n` intentos de reconexión.
    pub fn fail_reconnects(&self, n: u32) {
        self.lock().reconnect_faults = n;
    }

    pub fn lookup_count(&self) -> u64 {
        self.lock().lookups
    }

    pub fn reconnect_count(&self) -> u32 {
        self.lock().reconnects
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn workflows(&self) -> Vec<StoredWorkflow> {
        self.lock().workflows.clone()
    }

    pub fn states(&self) -> Vec<WorkflowStateRecord> {
        self.lock().states.clone()
    }

    pub fn host_maps(&self) -> Vec<WorkflowHostMap> {
        self.lock().host_maps.clone()
    }
}

/// Verifica el estado de la conexión simulada y consume un fallo
/// inyectado si lo hay. Toda operación de datos pasa por aquí.
fn guard(inner: &mut StoreInner) -> Result<()> {
    if inner.broken {
        return Err(LoadError::Connection("connection is down".to_string()));
    }
    if inner.faults > 0 {
        inner.faults -= 1;
        inner.broken = true;
        return Err(LoadError::Connection("injected connection fault".to_string()));
    }
    Ok(())
}

/// Valida una transición de estado contra las filas ya presentes:
/// not-null de wf_id/estado/timestamp y unicidad de la clave compuesta
/// (wf_id, state, timestamp).
fn validate_state(state: &WorkflowStateRecord, existing: &[WorkflowStateRecord]) -> Result<()> {
    let wf_id = state.wf_id
                     .ok_or_else(|| LoadError::Integrity("NOT NULL constraint failed: workflow_states.wf_id".to_string()))?;
    let st = state.state
                  .ok_or_else(|| LoadError::Integrity("NOT NULL constraint failed: workflow_states.state".to_string()))?;
    let ts = state.timestamp
                  .ok_or_else(|| {
                      LoadError::Integrity("NOT NULL constraint failed: workflow_states.timestamp".to_string())
                  })?;
    let duplicate = existing.iter().any(|s| {
                                       s.wf_id == Some(wf_id) && s.state == Some(st) && s.timestamp == Some(ts)
                                   });
    if duplicate {
        return Err(LoadError::Integrity("UNIQUE constraint failed: workflow_states.wf_id, workflow_states.state, \
                                         workflow_states.timestamp"
                                                                    .to_string()));
    }
    Ok(())
}

fn merge_into(workflows: &mut Vec<StoredWorkflow>, next_id: &mut i64, wf: &WorkflowRecord) {
    if let Some(stored) = workflows.iter_mut().find(|s| s.record.wf_uuid == wf.wf_uuid) {
        let wf_id = stored.wf_id;
        stored.record = wf.clone();
        stored.record.wf_id = Some(wf_id);
    } else {
        *next_id += 1;
        let wf_id = *next_id;
        let mut record = wf.clone();
        record.wf_id = Some(wf_id);
        workflows.push(StoredWorkflow { wf_id, record });
    }
}

impl DashboardRepository for InMemoryDashboardRepository {
    fn probe(&self) -> Result<()> {
        let inner = self.lock();
        if inner.broken {
            return Err(LoadError::Connection("connection is down".to_string()));
        }
        Ok(())
    }

    fn reconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.reconnect_faults > 0 {
            inner.reconnect_faults -= 1;
            return Err(LoadError::Connection("injected reconnect fault".to_string()));
        }
        inner.broken = false;
        inner.reconnects += 1;
        Ok(())
    }

    fn insert_workflow(&self, wf: &WorkflowRecord) -> Result<i64> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        if inner.workflows.iter().any(|s| s.record.wf_uuid == wf.wf_uuid) {
            return Err(LoadError::Integrity("UNIQUE constraint failed: workflows.wf_uuid".to_string()));
        }
        inner.next_id += 1;
        let wf_id = inner.next_id;
        let mut record = wf.clone();
        record.wf_id = Some(wf_id);
        inner.workflows.push(StoredWorkflow { wf_id, record });
        Ok(wf_id)
    }

    fn set_root_workflow(&self, wf_id: i64, root_wf_id: i64) -> Result<()> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        match inner.workflows.iter_mut().find(|s| s.wf_id == wf_id) {
            Some(stored) => {
                stored.record.root_wf_id = Some(root_wf_id);
                Ok(())
            }
            None => Err(LoadError::NotFound(format!("wf_id {}", wf_id))),
        }
    }

    fn workflow_id_by_uuid(&self, wf_uuid: &str) -> Result<Resolution> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        inner.lookups += 1;
        let matches: Vec<i64> = inner.workflows
                                     .iter()
                                     .filter(|s| s.record.wf_uuid == wf_uuid)
                                     .map(|s| s.wf_id)
                                     .collect();
        Ok(match matches.len() {
            0 => Resolution::NotFound,
            1 => Resolution::One(matches[0]),
            _ => Resolution::Ambiguous,
        })
    }

    fn root_id_by_uuid(&self, wf_uuid: &str) -> Result<Resolution> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        inner.lookups += 1;
        let matches: Vec<Option<i64>> = inner.workflows
                                             .iter()
                                             .filter(|s| s.record.wf_uuid == wf_uuid)
                                             .map(|s| s.record.root_wf_id)
                                             .collect();
        Ok(match matches.len() {
            0 => Resolution::NotFound,
            1 => match matches[0] {
                Some(id) => Resolution::One(id),
                None => Resolution::NotFound,
            },
            _ => Resolution::Ambiguous,
        })
    }

    fn insert_state(&self, state: &WorkflowStateRecord) -> Result<()> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        validate_state(state, &inner.states)?;
        inner.states.push(state.clone());
        Ok(())
    }

    fn merge_workflow(&self, wf: &WorkflowRecord) -> Result<()> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        let inner = &mut *inner;
        merge_into(&mut inner.workflows, &mut inner.next_id, wf);
        Ok(())
    }

    fn commit_batch(&self, inserts: &[WorkflowStateRecord], merges: &[WorkflowRecord]) -> Result<()> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        // simular la transacción: validar todo contra una copia y sólo
        // entonces publicar; ante un error no queda fila alguna
        let mut staged_states = inner.states.clone();
        for state in inserts {
            validate_state(state, &staged_states)?;
            staged_states.push(state.clone());
        }
        let mut staged_workflows = inner.workflows.clone();
        let mut staged_next_id = inner.next_id;
        for wf in merges {
            merge_into(&mut staged_workflows, &mut staged_next_id, wf);
        }
        inner.states = staged_states;
        inner.workflows = staged_workflows;
        inner.next_id = staged_next_id;
        Ok(())
    }

    fn insert_host_map(&self, map: &WorkflowHostMap) -> Result<()> {
        let mut inner = self.lock();
        guard(&mut inner)?;
        if inner.host_maps.iter().any(|m| m.wf_id == map.wf_id && m.host == map.host) {
            return Err(LoadError::Integrity("UNIQUE constraint failed: workflow_host_maps.wf_id, \
                                             workflow_host_maps.host"
                                                                     .to_string()));
        }
        inner.host_maps.push(map.clone());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}
