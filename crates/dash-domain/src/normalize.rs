// normalize.rs
//
// Normalización de registros crudos a objetos de dominio tipados: undot de
// nombres, remapeo de identificadores, escape de argv y coerciones
// numéricas. La política es leniente: un atributo que no se puede asignar
// se reporta y se sigue con el resto (el objeto queda parcialmente
// poblado, nunca rechazado).
use crate::records::{AttrValue, RawEvent, WorkflowRecord, WorkflowStateRecord};
use crate::DomainError;
use log::error;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Tabla fija de remapeo de identificadores ya aplanados a su campo
/// canónico de dominio.
static ATTR_REMAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
  let mut m = HashMap::new();
  // workflow
  m.insert("xwf_id", "wf_uuid");
  m
});

/// Convierte un nombre punteado a su forma plana: `xwf.id` -> `xwf_id`.
pub fn undot(key: &str) -> String {
  key.replace('.', "_")
}

/// Escapa un valor destinado a un campo argv para almacenarlo de forma
/// segura: backslash -> doble backslash, comilla simple -> comilla escapada.
pub fn escape_argv(value: &str) -> String {
  value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Falla de asignación de un atributo individual (nombre original + valor).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFailure {
  pub attribute: String,
  pub value: String,
}

/// Resultado de una normalización: el objeto (posiblemente parcial) y las
/// fallas por campo recolectadas.
#[derive(Debug)]
pub struct Normalized<T> {
  pub record: T,
  pub failures: Vec<FieldFailure>,
}

/// Forma destino de una normalización. Cada registro de dominio declara
/// qué campos acepta y cómo coercionar su valor.
pub trait EventShape: Default {
  fn assign(&mut self, field: &str, value: &AttrValue) -> Result<(), DomainError>;
}

/// Normaliza un registro crudo en una forma destino fresca. Determinista e
/// idempotente: el mismo registro produce siempre el mismo resultado.
pub fn normalize<T: EventShape>(raw: &RawEvent) -> Normalized<T> {
  let mut record = T::default();
  let mut failures = Vec::new();

  for (key, value) in raw.iter() {
    // metadato de verbosidad del log upstream, irrelevante para persistencia
    if key == "level" {
      continue;
    }

    let mut field = undot(key);
    if let Some(remapped) = ATTR_REMAP.get(field.as_str()) {
      field = (*remapped).to_string();
    }

    // sanear la entrada argv antes de asignar
    let coerced;
    let value = if field == "argv" {
      coerced = AttrValue::Str(escape_argv(&value.as_text()));
      &coerced
    } else {
      value
    };

    if let Err(e) = record.assign(&field, value) {
      error!("unable to process attribute {} with value: {} ({})", key, value, e);
      failures.push(FieldFailure { attribute: key.clone(), value: value.as_text() });
    }
  }

  Normalized { record, failures }
}

impl EventShape for WorkflowRecord {
  fn assign(&mut self, field: &str, value: &AttrValue) -> Result<(), DomainError> {
    match field {
      "wf_uuid" => self.wf_uuid = value.as_text(),
      "root_xwf_id" => self.root_xwf_id = Some(value.as_text()),
      "ts" => self.ts = Some(value.as_f64()?),
      "dax_label" => self.dax_label = Some(value.as_text()),
      "dax_version" => self.dax_version = Some(value.as_text()),
      "dax_file" => self.dax_file = Some(value.as_text()),
      "dag_file_name" => self.dag_file_name = Some(value.as_text()),
      "submit_hostname" => self.submit_hostname = Some(value.as_text()),
      "submit_dir" => self.submit_dir = Some(value.as_text()),
      "planner_version" => self.planner_version = Some(value.as_text()),
      "user" => self.user = Some(value.as_text()),
      "grid_dn" => self.grid_dn = Some(value.as_text()),
      "argv" => self.argv = Some(value.as_text()),
      "db_url" => self.db_url = Some(value.as_text()),
      "event" => self.event = Some(value.as_text()),
      other => return Err(DomainError::AssignError(other.to_string())),
    }
    Ok(())
  }
}

impl EventShape for WorkflowStateRecord {
  fn assign(&mut self, field: &str, value: &AttrValue) -> Result<(), DomainError> {
    match field {
      "wf_uuid" => self.wf_uuid = value.as_text(),
      "ts" => self.ts = Some(value.as_f64()?),
      "restart_count" => self.restart_count = Some(value.as_i32()?),
      "status" => self.status = Some(value.as_i32()?),
      "event" => self.event = Some(value.as_text()),
      other => return Err(DomainError::AssignError(other.to_string())),
    }
    Ok(())
  }
}
