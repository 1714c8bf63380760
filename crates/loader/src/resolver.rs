// Archivo: resolver.rs
// Propósito: cache memoizada de resolución de claves foráneas
// (UUID de workflow -> id interno). Reduce las consultas al almacenamiento
// durante el procesado de inserts.
use crate::errors::Result;
use crate::repository::Resolution;
use log::error;
use std::collections::HashMap;

/// Cache UUID -> id interno. La tubería mantiene dos instancias disjuntas
/// (id propio y root id) que se invalidan de forma independiente pero con
/// el mismo disparador: el evento terminal del workflow.
#[derive(Debug, Default)]
pub struct FkCache {
    entries: HashMap<String, i64>,
}

impl FkCache {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn get(&self, wf_uuid: &str) -> Option<i64> {
        self.entries.get(wf_uuid).copied()
    }

    pub fn contains(&self, wf_uuid: &str) -> bool {
        self.entries.contains_key(wf_uuid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Elimina la entrada del UUID, si existe. Devuelve true si había una.
    pub fn invalidate(&mut self, wf_uuid: &str) -> bool {
        self.entries.remove(wf_uuid).is_some()
    }

    /// Resuelve un UUID consultando primero la cache y, si no está, el
    /// almacenamiento mediante `lookup`. Un resultado único se memoiza;
    /// cero o múltiples resultados se reportan y devuelven `None` (el
    /// caller deja la FK sin asignar). Los errores de conexión del lookup
    /// se propagan para disparar la recuperación.
    pub fn resolve<F>(&mut self, wf_uuid: &str, what: &str, lookup: F) -> Result<Option<i64>>
    where
        F: FnOnce(&str) -> Result<Resolution>,
    {
        if let Some(id) = self.get(wf_uuid) {
            return Ok(Some(id));
        }
        match lookup(wf_uuid)? {
            Resolution::One(id) => {
                self.entries.insert(wf_uuid.to_string(), id);
                Ok(Some(id))
            }
            Resolution::NotFound => {
                error!("No {} results for wf_uuid {}", what, wf_uuid);
                Ok(None)
            }
            Resolution::Ambiguous => {
                error!("Multiple {} results for wf_uuid {}", what, wf_uuid);
                Ok(None)
            }
        }
    }
}
