// Archivo: errors.rs
// Propósito: definir los errores de la capa de carga y el alias Result<T>
// usado por las APIs del crate.
use thiserror::Error;

/// Errores de la tubería de carga y de la capa de persistencia.
///
/// - `Integrity`: violación de unicidad/constraint del esquema.
/// - `Connection`: conexión con el almacenamiento perdida o irrecuperable.
/// - `NotFound`: entidad no encontrada.
/// - `Ambiguous`: más de un resultado donde se esperaba uno (anomalía).
/// - `Config`: configuración requerida ausente o inválida (fatal al inicio).
/// - `Storage`: cualquier otro error del almacenamiento.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Violación de unicidad o de otra constraint al insertar.
    #[error("Violación de integridad: {0}")]
    Integrity(String),
    /// La conexión con el almacenamiento se perdió.
    #[error("Conexión perdida: {0}")]
    Connection(String),
    /// Entidad no encontrada.
    #[error("No encontrado: {0}")]
    NotFound(String),
    /// Más de un resultado para una búsqueda que debía ser única.
    #[error("Resultado ambiguo: {0}")]
    Ambiguous(String),
    /// Configuración requerida ausente (p.ej. connection string).
    #[error("Configuración inválida: {0}")]
    Config(String),
    /// Error genérico de almacenamiento.
    #[error("Error de almacenamiento: {0}")]
    Storage(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, LoadError>;
