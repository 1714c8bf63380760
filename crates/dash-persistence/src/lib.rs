//! Implementación Diesel de la persistencia del dashboard. Este archivo
//! expone el módulo `schema` y reexporta el repositorio Diesel que
//! implementa el trait `DashboardRepository` del crate `loader`. La
//! implementación detallada está en `dashboard_persistence.rs`.

mod dashboard_persistence;
pub mod schema;

pub use dashboard_persistence::{new_from_env, new_sqlite_for_test, DieselDashboardRepository, StateRow, WorkflowRow,
                                MIGRATIONS};
