// Archivo: repository.rs
// Propósito: definir el trait `DashboardRepository`, el contrato que deben
// implementar las persistencias (Diesel/Postgres, in-memory, etc.) usadas
// por la tubería de carga.
use crate::errors::Result;
use dash_domain::{WorkflowHostMap, WorkflowRecord, WorkflowStateRecord};

/// Resultado de resolver un UUID de workflow contra el almacenamiento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Exactamente una fila: el id interno buscado.
    One(i64),
    /// Ninguna fila coincide con el UUID.
    NotFound,
    /// Más de una fila coincide (anomalía de integridad de datos).
    Ambiguous,
}

/// Contrato mínimo de la persistencia del dashboard.
///
/// Una única sesión/conexión sincrónica: las operaciones se invocan una a
/// la vez desde la tubería. Toda operación que toque la conexión debe
/// devolver `LoadError::Connection` ante una conexión cortada y
/// `LoadError::Integrity` ante una violación de constraint, ya con la
/// transacción en curso deshecha (rollback) para no dejar la sesión
/// envenenada.
pub trait DashboardRepository: Send + Sync {
    /// Sondea la conexión (consulta trivial). `Err(Connection)` significa
    /// conexión muerta.
    fn probe(&self) -> Result<()>;

    /// Intenta restablecer la conexión tras una pérdida.
    fn reconnect(&self) -> Result<()>;

    /// Inserta la fila de workflow y devuelve el id interno asignado.
    fn insert_workflow(&self, wf: &WorkflowRecord) -> Result<i64>;

    /// Backfill del root id de un workflow ya insertado.
    fn set_root_workflow(&self, wf_id: i64, root_wf_id: i64) -> Result<()>;

    /// Busca el id interno del workflow con ese UUID.
    fn workflow_id_by_uuid(&self, wf_uuid: &str) -> Result<Resolution>;

    /// Busca el id interno del workflow raíz del workflow con ese UUID.
    fn root_id_by_uuid(&self, wf_uuid: &str) -> Result<Resolution>;

    /// Inserta una transición de estado individual (commit propio).
    fn insert_state(&self, state: &WorkflowStateRecord) -> Result<()>;

    /// Merge (upsert por `wf_uuid`) de una fila de workflow.
    fn merge_workflow(&self, wf: &WorkflowRecord) -> Result<()>;

    /// Commit en bloque: todos los inserts y merges en una única
    /// transacción. Todo-o-nada: ante un error no debe quedar fila alguna.
    fn commit_batch(&self, inserts: &[WorkflowStateRecord], merges: &[WorkflowRecord]) -> Result<()>;

    /// Inserta una asociación workflow -> host (commit propio).
    fn insert_host_map(&self, map: &WorkflowHostMap) -> Result<()>;

    /// Libera la conexión. Tras esto el repositorio no debe usarse.
    fn close(&self) -> Result<()>;
}
