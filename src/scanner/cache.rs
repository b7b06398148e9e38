//! ScanCycleCache: per-cycle entity snapshot
//!
//! Built once from a single catalogue fetch at the start of a scan cycle and
//! shared read-only (behind an `Arc`) by every phase of that cycle.

use std::collections::HashMap;

use crate::scanner::registry::EntityDefinition;

#[derive(Debug, Clone, Default)]
pub struct ScanCycleCache {
    entities: Vec<EntityDefinition>,
    by_label: HashMap<String, usize>,
    by_alias: HashMap<String, usize>,
    by_id: HashMap<String, usize>,
}

impl ScanCycleCache {
    pub fn new(entities: Vec<EntityDefinition>) -> Self {
        let mut by_label = HashMap::with_capacity(entities.len());
        let mut by_alias = HashMap::new();
        let mut by_id = HashMap::with_capacity(entities.len());

        for (index, entity) in entities.iter().enumerate() {
            // First registration of a label wins
            by_label.entry(entity.label.to_lowercase()).or_insert(index);
            by_id.entry(entity.id.clone()).or_insert(index);
            for alias in &entity.aliases {
                by_alias.entry(alias.to_lowercase()).or_insert(index);
            }
        }

        Self {
            entities,
            by_label,
            by_alias,
            by_id,
        }
    }

    /// Case-insensitive lookup by label, then by alias.
    pub fn find(&self, surface: &str) -> Option<&EntityDefinition> {
        let key = surface.trim().to_lowercase();
        self.by_label
            .get(&key)
            .or_else(|| self.by_alias.get(&key))
            .map(|&i| &self.entities[i])
    }

    pub fn find_by_label(&self, label: &str) -> Option<&EntityDefinition> {
        self.by_label
            .get(&label.trim().to_lowercase())
            .map(|&i| &self.entities[i])
    }

    pub fn get(&self, id: &str) -> Option<&EntityDefinition> {
        self.by_id.get(id).map(|&i| &self.entities[i])
    }

    pub fn entities(&self) -> &[EntityDefinition] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
