//! Crate `loader` — tubería de ingesta de eventos de ciclo de vida de
//! workflows hacia el esquema del dashboard.
//!
//! Este crate define el contrato de persistencia `DashboardRepository`, la
//! tubería `DashboardLoader` (normalización, resolución FK con cache,
//! batching con flush por umbral o por tiempo, commit transaccional con
//! degradación y recuperación de conexión) y una implementación en memoria
//! útil para pruebas (`InMemoryDashboardRepository`).
//!
//! Diseño resumido:
//! - Ejecución monohilo y sincrónica: un registro a la vez, en orden de
//!   llegada; dentro de un flush los inserts comitean antes que los merges
//!   y las asociaciones host se escriben en una segunda pasada.
//! - Errores de régimen permanente (tag desconocido, violación de
//!   integridad, FK sin resolver) se reportan y la tubería continúa; sólo
//!   la configuración ausente y el fallo de inicialización son fatales.
//! - Las caches FK nunca retienen entradas más allá del evento terminal de
//!   su workflow, acotando su crecimiento a los workflows activos.
pub mod engine;
pub mod errors;
pub mod repository;
pub mod resolver;
pub mod stubs;

pub use engine::*;
pub use errors::*;
pub use repository::*;
pub use resolver::*;
pub use stubs::*;
