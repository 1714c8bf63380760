use crate::schema;
use crate::schema::workflow_host_maps::dsl as host_dsl;
use crate::schema::workflow_states::dsl as state_dsl;
use crate::schema::workflows::dsl as wf_dsl;
use dash_domain::{WorkflowHostMap, WorkflowRecord, WorkflowStateRecord};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use loader::{DashboardRepository, LoadError, Resolution};
use log::debug;
use std::sync::Arc;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

#[cfg(all(feature = "pg", not(test)))]
type DbPool = Pool<ConnectionManager<PgConnection>>;
#[cfg(any(test, not(feature = "pg")))]
type DbPool = Pool<ConnectionManager<SqliteConnection>>;
#[cfg(all(feature = "pg", not(test)))]
type DbConn = PgConnection;
#[cfg(any(test, not(feature = "pg")))]
type DbConn = SqliteConnection;

/// Repo Diesel que implementa `DashboardRepository` sobre una única
/// sesión (pool de tamaño 1: la tubería es monohilo y el estado
/// transaccional debe ser el de esa sesión).
pub struct DieselDashboardRepository {
  pool: Arc<DbPool>,
}

impl DieselDashboardRepository {
  pub fn new(database_url: &str) -> Result<Self, LoadError> {
    #[cfg(any(test, not(feature = "pg")))]
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    #[cfg(all(feature = "pg", not(test)))]
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder().max_size(1)
                              .build(manager)
                              .map_err(|e| LoadError::Config(format!("pool: {}", e)))?;
    let repo = DieselDashboardRepository { pool: Arc::new(pool) };
    {
      let mut c = repo.conn()?;
      let _ = diesel::sql_query("PRAGMA journal_mode = WAL;").execute(&mut c);
      let _ = diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(&mut c);
      c.run_pending_migrations(MIGRATIONS)
       .map_err(|e| LoadError::Storage(format!("migrations: {}", e)))?;
    }
    Ok(repo)
  }

  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>, LoadError> {
    // el pool sólo falla al entregar conexión cuando ésta no se puede
    // (re)abrir: eso es una pérdida de conexión para la tubería
    self.pool.get().map_err(|e| LoadError::Connection(format!("pool: {}", e)))
  }

  /// Dump de las tablas para inspección en pruebas.
  pub fn dump_tables_for_debug(&self) -> Result<(Vec<WorkflowRow>, Vec<StateRow>), LoadError> {
    let mut conn = self.conn()?;
    let wfs = wf_dsl::workflows.load::<WorkflowRow>(&mut conn).map_err(map_db_err)?;
    let states = state_dsl::workflow_states.load::<StateRow>(&mut conn).map_err(map_db_err)?;
    Ok((wfs, states))
  }
}

// Diesel row structs for the dashboard tables
#[derive(Debug, Clone, Queryable)]
pub struct WorkflowRow {
  pub wf_id: i64,
  pub wf_uuid: String,
  pub dax_label: Option<String>,
  pub dax_version: Option<String>,
  pub dax_file: Option<String>,
  pub dag_file_name: Option<String>,
  pub timestamp: Option<f64>,
  pub submit_hostname: Option<String>,
  pub submit_dir: Option<String>,
  pub planner_version: Option<String>,
  pub user: Option<String>,
  pub grid_dn: Option<String>,
  pub argv: Option<String>,
  pub db_url: Option<String>,
  pub root_wf_id: Option<i64>,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = schema::workflows)]
struct NewWorkflowRow<'a> {
  wf_uuid: &'a str,
  dax_label: Option<&'a str>,
  dax_version: Option<&'a str>,
  dax_file: Option<&'a str>,
  dag_file_name: Option<&'a str>,
  timestamp: Option<f64>,
  submit_hostname: Option<&'a str>,
  submit_dir: Option<&'a str>,
  planner_version: Option<&'a str>,
  user: Option<&'a str>,
  grid_dn: Option<&'a str>,
  argv: Option<&'a str>,
  db_url: Option<&'a str>,
  root_wf_id: Option<i64>,
}

#[derive(Debug, Clone, Queryable)]
pub struct StateRow {
  pub wf_id: i64,
  pub state: String,
  pub timestamp: f64,
  pub restart_count: Option<i32>,
  pub status: Option<i32>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::workflow_states)]
struct NewStateRow {
  wf_id: i64,
  state: &'static str,
  timestamp: f64,
  restart_count: Option<i32>,
  status: Option<i32>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = schema::workflow_host_maps)]
struct NewHostMapRow<'a> {
  wf_id: i64,
  host: &'a str,
}

fn map_db_err(e: DieselError) -> LoadError {
  match e {
    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
      LoadError::Integrity(info.message().to_string())
    }
    DieselError::DatabaseError(DatabaseErrorKind::NotNullViolation, info) => {
      LoadError::Integrity(info.message().to_string())
    }
    DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
      LoadError::Connection(info.message().to_string())
    }
    DieselError::BrokenTransactionManager => LoadError::Connection("broken transaction manager".to_string()),
    DieselError::NotFound => LoadError::NotFound("no rows".to_string()),
    other => LoadError::Storage(format!("db: {}", other)),
  }
}

fn workflow_values(wf: &WorkflowRecord) -> NewWorkflowRow<'_> {
  NewWorkflowRow { wf_uuid: &wf.wf_uuid,
                   dax_label: wf.dax_label.as_deref(),
                   dax_version: wf.dax_version.as_deref(),
                   dax_file: wf.dax_file.as_deref(),
                   dag_file_name: wf.dag_file_name.as_deref(),
                   timestamp: wf.timestamp,
                   submit_hostname: wf.submit_hostname.as_deref(),
                   submit_dir: wf.submit_dir.as_deref(),
                   planner_version: wf.planner_version.as_deref(),
                   user: wf.user.as_deref(),
                   grid_dn: wf.grid_dn.as_deref(),
                   argv: wf.argv.as_deref(),
                   db_url: wf.db_url.as_deref(),
                   root_wf_id: wf.root_wf_id }
}

/// Construye la fila de estado aplicando las constraints not-null antes de
/// tocar la base: una FK sin resolver es una violación de integridad.
fn state_values(state: &WorkflowStateRecord) -> Result<NewStateRow, LoadError> {
  let wf_id = state.wf_id
                   .ok_or_else(|| LoadError::Integrity("NOT NULL constraint failed: workflow_states.wf_id".to_string()))?;
  let st = state.state
                .ok_or_else(|| LoadError::Integrity("NOT NULL constraint failed: workflow_states.state".to_string()))?;
  let timestamp = state.timestamp
                       .ok_or_else(|| {
                         LoadError::Integrity("NOT NULL constraint failed: workflow_states.timestamp".to_string())
                       })?;
  Ok(NewStateRow { wf_id, state: st.as_str(), timestamp, restart_count: state.restart_count, status: state.status })
}

/// Merge (upsert por wf_uuid) dentro de la conexión dada. Los campos None
/// del registro no sobreescriben columnas ya pobladas.
fn merge_workflow_on(conn: &mut DbConn, wf: &WorkflowRecord) -> Result<(), DieselError> {
  let existing: Option<i64> = wf_dsl::workflows.filter(wf_dsl::wf_uuid.eq(&wf.wf_uuid))
                                               .select(wf_dsl::wf_id)
                                               .first(conn)
                                               .optional()?;
  let row = workflow_values(wf);
  match existing {
    Some(id) => {
      diesel::update(wf_dsl::workflows.filter(wf_dsl::wf_id.eq(id))).set(&row).execute(conn)?;
    }
    None => {
      diesel::insert_into(wf_dsl::workflows).values(&row).execute(conn)?;
    }
  }
  Ok(())
}

impl DashboardRepository for DieselDashboardRepository {
  fn probe(&self) -> Result<(), LoadError> {
    debug!("probing connection");
    let mut conn = self.conn()?;
    diesel::sql_query("SELECT 1")
      .execute(&mut conn)
      .map_err(|e| LoadError::Connection(format!("probe: {}", e)))?;
    Ok(())
  }

  fn reconnect(&self) -> Result<(), LoadError> {
    // r2d2 descarta conexiones rotas al devolverlas; pedir una nueva y
    // sondearla equivale a reabrir la sesión
    let mut conn = self.conn()?;
    diesel::sql_query("SELECT 1")
      .execute(&mut conn)
      .map_err(|e| LoadError::Connection(format!("reconnect: {}", e)))?;
    Ok(())
  }

  fn insert_workflow(&self, wf: &WorkflowRecord) -> Result<i64, LoadError> {
    let mut conn = self.conn()?;
    let row = workflow_values(wf);
    diesel::insert_into(wf_dsl::workflows).values(&row).execute(&mut conn).map_err(map_db_err)?;
    // recuperar el id asignado; wf_uuid es único, hay exactamente una fila
    wf_dsl::workflows.filter(wf_dsl::wf_uuid.eq(&wf.wf_uuid))
                     .select(wf_dsl::wf_id)
                     .first::<i64>(&mut conn)
                     .map_err(map_db_err)
  }

  fn set_root_workflow(&self, wf_id: i64, root_wf_id: i64) -> Result<(), LoadError> {
    let mut conn = self.conn()?;
    diesel::update(wf_dsl::workflows.filter(wf_dsl::wf_id.eq(wf_id))).set(wf_dsl::root_wf_id.eq(Some(root_wf_id)))
                                                                     .execute(&mut conn)
                                                                     .map_err(map_db_err)?;
    Ok(())
  }

  fn workflow_id_by_uuid(&self, wf_uuid: &str) -> Result<Resolution, LoadError> {
    let mut conn = self.conn()?;
    let ids: Vec<i64> = wf_dsl::workflows.filter(wf_dsl::wf_uuid.eq(wf_uuid))
                                         .select(wf_dsl::wf_id)
                                         .load(&mut conn)
                                         .map_err(map_db_err)?;
    Ok(match ids.len() {
      0 => Resolution::NotFound,
      1 => Resolution::One(ids[0]),
      _ => Resolution::Ambiguous,
    })
  }

  fn root_id_by_uuid(&self, wf_uuid: &str) -> Result<Resolution, LoadError> {
    let mut conn = self.conn()?;
    let roots: Vec<Option<i64>> = wf_dsl::workflows.filter(wf_dsl::wf_uuid.eq(wf_uuid))
                                                   .select(wf_dsl::root_wf_id)
                                                   .load(&mut conn)
                                                   .map_err(map_db_err)?;
    Ok(match roots.len() {
      0 => Resolution::NotFound,
      1 => match roots[0] {
        Some(id) => Resolution::One(id),
        // fila presente pero root aún sin backfill: para el caller es lo
        // mismo que no tener resultado
        None => Resolution::NotFound,
      },
      _ => Resolution::Ambiguous,
    })
  }

  fn insert_state(&self, state: &WorkflowStateRecord) -> Result<(), LoadError> {
    let mut conn = self.conn()?;
    let row = state_values(state)?;
    diesel::insert_into(state_dsl::workflow_states).values(&row).execute(&mut conn).map_err(map_db_err)?;
    Ok(())
  }

  fn merge_workflow(&self, wf: &WorkflowRecord) -> Result<(), LoadError> {
    let mut conn = self.conn()?;
    merge_workflow_on(&mut conn, wf).map_err(map_db_err)
  }

  fn commit_batch(&self, inserts: &[WorkflowStateRecord], merges: &[WorkflowRecord]) -> Result<(), LoadError> {
    let mut conn = self.conn()?;
    // las constraints not-null se aplican antes de abrir la transacción
    let rows = inserts.iter().map(state_values).collect::<Result<Vec<_>, _>>()?;
    conn.transaction::<_, DieselError, _>(|conn| {
          for row in &rows {
            diesel::insert_into(state_dsl::workflow_states).values(row).execute(conn)?;
          }
          for wf in merges {
            merge_workflow_on(conn, wf)?;
          }
          Ok(())
        })
        .map_err(map_db_err)
  }

  fn insert_host_map(&self, map: &WorkflowHostMap) -> Result<(), LoadError> {
    let mut conn = self.conn()?;
    let row = NewHostMapRow { wf_id: map.wf_id, host: &map.host };
    diesel::insert_into(host_dsl::workflow_host_maps).values(&row).execute(&mut conn).map_err(map_db_err)?;
    Ok(())
  }

  fn close(&self) -> Result<(), LoadError> {
    debug!("releasing dashboard connection");
    Ok(())
  }
}

/// Crear repo desde las variables de entorno. Con el feature `pg` exige
/// una URL de Postgres; sin él acepta rutas/URLs de SQLite.
#[cfg(all(feature = "pg", not(test)))]
pub fn new_from_env() -> Result<DieselDashboardRepository, LoadError> {
  dotenvy::dotenv().ok();
  let url = std::env::var("DASH_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                        .map_err(|_| LoadError::Config("DASH_DB_URL / DATABASE_URL not set".into()))?;
  if !(url.starts_with("postgres") || url.starts_with("postgresql://") || url.contains('@')) {
    return Err(LoadError::Config("dash-persistence: DASH_DB_URL does not look like Postgres URL".into()));
  }
  DieselDashboardRepository::new(&url)
}

#[cfg(test)]
pub fn new_from_env() -> Result<DieselDashboardRepository, LoadError> {
  dotenvy::dotenv().ok();
  let url = std::env::var("DASH_DB_URL").unwrap_or_else(|_| "file:dashdb?mode=memory&cache=shared".into());
  DieselDashboardRepository::new(&url)
}

#[cfg(all(not(feature = "pg"), not(test)))]
pub fn new_from_env() -> Result<DieselDashboardRepository, LoadError> {
  dotenvy::dotenv().ok();
  let url = std::env::var("DASH_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                        .map_err(|_| LoadError::Config("DASH_DB_URL / DATABASE_URL not set".into()))?;
  DieselDashboardRepository::new(&url)
}

// Test helper: construct the repository over an explicit SQLite path,
// bypassing environment parsing.
pub fn new_sqlite_for_test(database_url: &str) -> Result<DieselDashboardRepository, LoadError> {
  DieselDashboardRepository::new(database_url)
}
