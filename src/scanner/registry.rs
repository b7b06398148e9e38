//! Collaborator interfaces consumed by the orchestrator
//!
//! The entity catalogue, relationship store, pattern catalogue, document
//! provider and calendar source are injected as trait objects. In-memory
//! implementations back the WASM facade and the test suite.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::scanner::error::{RegistryError, ScanError};
use crate::scanner::syntax::{default_patterns, PatternDefinition};
use crate::scanner::temporal::CalendarDefinition;

// =============================================================================
// Types
// =============================================================================

/// Entity definition as stored by the catalogue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityDefinition {
    pub id: String,
    pub label: String,
    pub kind: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Optional data attached to an entity registration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegisterOptions {
    pub subtype: Option<String>,
    pub attributes: Option<serde_json::Value>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Where a persisted fact came from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    /// "inference" for heuristics, "explicit" for bracket syntax
    pub source: String,
    pub origin_id: String,
    pub confidence: f64,
    /// Unix millis
    pub timestamp: i64,
}

/// One edge handed to the relationship store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationshipRecord {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub provenance: Vec<Provenance>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

// =============================================================================
// Interfaces
// =============================================================================

#[async_trait]
pub trait EntityCatalogue: Send + Sync {
    async fn get_all(&self) -> Result<Vec<EntityDefinition>, RegistryError>;

    /// Create or merge an entity; returns its id.
    async fn register_entity(
        &self,
        label: &str,
        kind: &str,
        document_id: &str,
        options: RegisterOptions,
    ) -> Result<String, RegistryError>;

    async fn find_by_label(&self, label: &str) -> Result<Option<EntityDefinition>, RegistryError>;

    async fn update_mention_count(
        &self,
        entity_id: &str,
        document_id: &str,
        delta: i64,
    ) -> Result<(), RegistryError>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn add(&self, record: RelationshipRecord) -> Result<(), RegistryError>;
}

pub trait PatternCatalogue: Send + Sync {
    fn get_active_patterns(&self) -> Result<Vec<PatternDefinition>, RegistryError>;

    fn get_compiled_pattern(&self, id: &str) -> Option<PatternDefinition>;
}

/// Supplies the current text of a document when a debounce timer fires.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn get_text(&self, document_id: &str) -> Result<String, RegistryError>;
}

/// Per-world calendar lookup for temporal hydration
pub trait CalendarRegistry: Send + Sync {
    fn get_calendar(&self, calendar_id: &str) -> Option<CalendarDefinition>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// InMemoryEntityCatalogue
// =============================================================================

/// Entity catalogue kept in process memory. Counts calls for assertions.
#[derive(Debug, Default)]
pub struct InMemoryEntityCatalogue {
    entities: Mutex<Vec<EntityDefinition>>,
    mention_counts: Mutex<HashMap<(String, String), i64>>,
    next_id: AtomicUsize,
    get_all_calls: AtomicUsize,
    writes: AtomicUsize,
    offline: AtomicBool,
}

impl InMemoryEntityCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entities(entities: Vec<EntityDefinition>) -> Self {
        let catalogue = Self::new();
        *lock(&catalogue.entities) = entities;
        catalogue
    }

    pub fn entities(&self) -> Vec<EntityDefinition> {
        lock(&self.entities).clone()
    }

    pub fn mention_count(&self, entity_id: &str, document_id: &str) -> i64 {
        lock(&self.mention_counts)
            .get(&(entity_id.to_string(), document_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn get_all_calls(&self) -> usize {
        self.get_all_calls.load(Ordering::SeqCst)
    }

    /// Registrations plus mention-count updates
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate the backing store going away.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), RegistryError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RegistryError::Unavailable("entity catalogue offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EntityCatalogue for InMemoryEntityCatalogue {
    async fn get_all(&self) -> Result<Vec<EntityDefinition>, RegistryError> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        Ok(self.entities())
    }

    async fn register_entity(
        &self,
        label: &str,
        kind: &str,
        _document_id: &str,
        options: RegisterOptions,
    ) -> Result<String, RegistryError> {
        self.check_online()?;
        if label.trim().is_empty() {
            return Err(RegistryError::Rejected("empty label".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut entities = lock(&self.entities);
        let existing = entities
            .iter_mut()
            .find(|e| e.label.eq_ignore_ascii_case(label) && e.kind.eq_ignore_ascii_case(kind));

        if let Some(entity) = existing {
            for alias in options.aliases {
                let known = entity.label.eq_ignore_ascii_case(&alias)
                    || entity.aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias));
                if !known {
                    entity.aliases.push(alias);
                }
            }
            return Ok(entity.id.clone());
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{}-{}", kind.to_lowercase(), n);
        entities.push(EntityDefinition {
            id: id.clone(),
            label: label.to_string(),
            kind: kind.to_string(),
            aliases: options.aliases,
        });
        Ok(id)
    }

    async fn find_by_label(&self, label: &str) -> Result<Option<EntityDefinition>, RegistryError> {
        self.check_online()?;
        Ok(lock(&self.entities)
            .iter()
            .find(|e| e.label.eq_ignore_ascii_case(label))
            .cloned())
    }

    async fn update_mention_count(
        &self,
        entity_id: &str,
        document_id: &str,
        delta: i64,
    ) -> Result<(), RegistryError> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        *lock(&self.mention_counts)
            .entry((entity_id.to_string(), document_id.to_string()))
            .or_insert(0) += delta;
        Ok(())
    }
}

// =============================================================================
// InMemoryRelationshipStore
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryRelationshipStore {
    records: Mutex<Vec<RelationshipRecord>>,
    rejected_types: Mutex<HashSet<String>>,
    add_calls: AtomicUsize,
    offline: AtomicBool,
}

impl InMemoryRelationshipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RelationshipRecord> {
        lock(&self.records).clone()
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Make every insert of `relation_type` fail.
    pub fn reject_type(&self, relation_type: &str) {
        lock(&self.rejected_types).insert(relation_type.to_string());
    }

    /// Fail every insert with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelationshipStore for InMemoryRelationshipStore {
    async fn add(&self, record: RelationshipRecord) -> Result<(), RegistryError> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("relationship store offline".to_string()));
        }
        if lock(&self.rejected_types).contains(&record.relation_type) {
            return Err(RegistryError::Rejected(format!(
                "{} edges are not accepted",
                record.relation_type
            )));
        }
        lock(&self.records).push(record);
        Ok(())
    }
}

// =============================================================================
// BuiltinPatternCatalogue
// =============================================================================

/// Serves the built-in bracket syntax plus any registered custom patterns.
#[derive(Debug, Default)]
pub struct BuiltinPatternCatalogue {
    patterns: Mutex<Vec<PatternDefinition>>,
    offline: AtomicBool,
}

impl BuiltinPatternCatalogue {
    pub fn new() -> Result<Self, ScanError> {
        Ok(Self {
            patterns: Mutex::new(default_patterns()?),
            offline: AtomicBool::new(false),
        })
    }

    pub fn add_pattern(&self, pattern: PatternDefinition) {
        let mut patterns = lock(&self.patterns);
        patterns.retain(|p| p.id != pattern.id);
        patterns.push(pattern);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl PatternCatalogue for BuiltinPatternCatalogue {
    fn get_active_patterns(&self) -> Result<Vec<PatternDefinition>, RegistryError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RegistryError::Unavailable("pattern catalogue offline".into()));
        }
        Ok(lock(&self.patterns).iter().filter(|p| p.enabled).cloned().collect())
    }

    fn get_compiled_pattern(&self, id: &str) -> Option<PatternDefinition> {
        lock(&self.patterns).iter().find(|p| p.id == id).cloned()
    }
}

// =============================================================================
// StaticDocumentProvider / InMemoryCalendarRegistry
// =============================================================================

#[derive(Debug, Default)]
pub struct StaticDocumentProvider {
    texts: Mutex<HashMap<String, String>>,
}

impl StaticDocumentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&self, document_id: &str, text: &str) {
        lock(&self.texts).insert(document_id.to_string(), text.to_string());
    }
}

#[async_trait]
impl DocumentProvider for StaticDocumentProvider {
    async fn get_text(&self, document_id: &str) -> Result<String, RegistryError> {
        lock(&self.texts)
            .get(document_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(document_id.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCalendarRegistry {
    calendars: Mutex<HashMap<String, CalendarDefinition>>,
}

impl InMemoryCalendarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, calendar: CalendarDefinition) {
        lock(&self.calendars).insert(calendar.id.clone(), calendar);
    }
}

impl CalendarRegistry for InMemoryCalendarRegistry {
    fn get_calendar(&self, calendar_id: &str) -> Option<CalendarDefinition> {
        lock(&self.calendars).get(calendar_id).cloned()
    }
}

// =============================================================================
// Tests
// =============================================================================
