// records.rs
use crate::DomainError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Valor crudo de un atributo tal como llega por el wire: cadena o número.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
  Str(String),
  Num(f64),
}

impl AttrValue {
  pub fn as_text(&self) -> String {
    match self {
      AttrValue::Str(s) => s.clone(),
      AttrValue::Num(n) => n.to_string(),
    }
  }

  /// Coerción numérica a float. Las cadenas numéricas también se aceptan.
  pub fn as_f64(&self) -> Result<f64, DomainError> {
    match self {
      AttrValue::Num(n) => Ok(*n),
      AttrValue::Str(s) => s.trim()
                            .parse::<f64>()
                            .map_err(|_| DomainError::ValidationError(format!("no es un float: {}", s))),
    }
  }

  /// Coerción numérica a entero. Un float con parte fraccionaria falla.
  pub fn as_i32(&self) -> Result<i32, DomainError> {
    match self {
      AttrValue::Num(n) => {
        if n.fract() == 0.0 {
          Ok(*n as i32)
        } else {
          Err(DomainError::ValidationError(format!("no es un entero: {}", n)))
        }
      }
      AttrValue::Str(s) => s.trim()
                            .parse::<i32>()
                            .map_err(|_| DomainError::ValidationError(format!("no es un entero: {}", s))),
    }
  }
}

impl fmt::Display for AttrValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AttrValue::Str(s) => write!(f, "{}", s),
      AttrValue::Num(n) => write!(f, "{}", n),
    }
  }
}

/// Un registro crudo: mapa ordenado de atributos con nombre punteado
/// (`xwf.id`, `ts`, ...) más la clave distinguida `event`. Vive sólo
/// durante una llamada a `process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
  attrs: IndexMap<String, AttrValue>,
}

impl RawEvent {
  pub fn new(attrs: IndexMap<String, AttrValue>) -> Self {
    Self { attrs }
  }

  /// Construye el registro desde un objeto JSON (una línea del harness).
  /// La clave `event` es obligatoria; los valores null se omiten.
  pub fn from_json(value: &serde_json::Value) -> Result<Self, DomainError> {
    let obj = value.as_object()
                   .ok_or_else(|| DomainError::ValidationError("el registro debe ser un objeto JSON".to_string()))?;
    let mut attrs = IndexMap::new();
    for (k, v) in obj {
      match v {
        serde_json::Value::String(s) => {
          attrs.insert(k.clone(), AttrValue::Str(s.clone()));
        }
        serde_json::Value::Number(n) => {
          if let Some(f) = n.as_f64() {
            attrs.insert(k.clone(), AttrValue::Num(f));
          }
        }
        serde_json::Value::Null => {}
        other => {
          attrs.insert(k.clone(), AttrValue::Str(other.to_string()));
        }
      }
    }
    let raw = Self { attrs };
    if raw.event().is_none() {
      return Err(DomainError::ValidationError("el registro no contiene la clave 'event'".to_string()));
    }
    Ok(raw)
  }

  /// Tag del tipo de evento (`dashboard.wf.plan`, ...), si está presente.
  pub fn event(&self) -> Option<&str> {
    match self.attrs.get("event") {
      Some(AttrValue::Str(s)) => Some(s.as_str()),
      _ => None,
    }
  }

  pub fn get(&self, key: &str) -> Option<&AttrValue> {
    self.attrs.get(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&String, &AttrValue)> {
    self.attrs.iter()
  }
}

/// Estados de ciclo de vida reconocidos para un workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
  Started,
  Terminated,
}

impl WorkflowState {
  pub fn as_str(&self) -> &'static str {
    match self {
      WorkflowState::Started => "WORKFLOW_STARTED",
      WorkflowState::Terminated => "WORKFLOW_TERMINATED",
    }
  }
}

impl fmt::Display for WorkflowState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Fila de workflow del dashboard. `wf_id` lo asigna la capa de
/// persistencia al insertar; `root_wf_id` queda null hasta el backfill.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
  pub wf_uuid: String,
  pub wf_id: Option<i64>,
  pub root_xwf_id: Option<String>,
  pub root_wf_id: Option<i64>,
  pub ts: Option<f64>,
  pub timestamp: Option<f64>,
  pub dax_label: Option<String>,
  pub dax_version: Option<String>,
  pub dax_file: Option<String>,
  pub dag_file_name: Option<String>,
  pub submit_hostname: Option<String>,
  pub submit_dir: Option<String>,
  pub planner_version: Option<String>,
  pub user: Option<String>,
  pub grid_dn: Option<String>,
  pub argv: Option<String>,
  pub db_url: Option<String>,
  /// Tag del evento que originó el registro. No se persiste.
  pub event: Option<String>,
}

/// Transición de estado de un workflow. Efímero: se vuelve fila al commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStateRecord {
  pub wf_uuid: String,
  pub wf_id: Option<i64>,
  pub state: Option<WorkflowState>,
  pub ts: Option<f64>,
  pub timestamp: Option<f64>,
  pub restart_count: Option<i32>,
  pub status: Option<i32>,
  /// Tag del evento que originó el registro. No se persiste.
  pub event: Option<String>,
}

impl WorkflowStateRecord {
  /// Indica si el registro representa un evento terminal.
  pub fn is_terminal(&self) -> bool {
    matches!(self.state, Some(WorkflowState::Terminated))
  }
}

/// Asociación auxiliar workflow -> host escrita en la segunda pasada del
/// flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowHostMap {
  pub wf_id: i64,
  pub host: String,
}
