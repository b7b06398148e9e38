//! ScanOrchestrator: debounced, phase-isolated scan cycles
//!
//! # Lifecycle (per document)
//! `Idle` → `Pending` (change recorded, debounce timer armed) → `Scanning`
//! (timer fired) → `Idle`. A change arriving while `Pending` restarts the
//! timer; a change arriving while `Scanning` arms a new timer and never
//! interrupts the running cycle.
//!
//! # Cycle
//! 1. entities: extract, enrich, register
//! 2. triples: extract, resolve, persist
//! 3. implicit mentions: match, write mention-count deltas
//! 4. relationships: infer (optionally on the worker), persist
//! 5. temporal: extract, publish `temporal:detected`
//!
//! The entity catalogue is fetched once per cycle into a `ScanCycleCache`.
//! Every phase returns its own `Result`; a failed phase is logged and recorded
//! in the `CycleReport` and the next phase still runs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::scanner::analyzer::LinguisticAnalyzer;
use crate::scanner::cache::ScanCycleCache;
use crate::scanner::change::{ChangeDetector, DocumentChange};
use crate::scanner::config::ScanConfig;
use crate::scanner::enrich::{Disambiguator, EnrichedMatch, NlpEnricher};
use crate::scanner::error::{RegistryError, ScanError};
use crate::scanner::events::{EventBus, ScanEvent};
use crate::scanner::implicit::{ImplicitCortex, ImplicitMatch};
use crate::scanner::registry::{
    CalendarRegistry, DocumentProvider, EntityCatalogue, PatternCatalogue, Provenance, RegisterOptions,
    RelationshipRecord, RelationshipStore,
};
use crate::scanner::relation::{EntitySpan, ExtractedRelationship, RelationCortex, RelationRules, RelationStats};
use crate::scanner::syntax::{build_extractor, PatternKind, PatternMatchEvent};
use crate::scanner::temporal::TemporalCortex;
use crate::scanner::triple::{ExtractedTriple, TripleCortex, UNKNOWN_KIND};
use crate::scanner::worker::RelationWorker;

const PROVENANCE_EXPLICIT: &str = "explicit";
const PROVENANCE_INFERENCE: &str = "inference";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn elapsed_us(start: instant::Instant) -> u64 {
    start.elapsed().as_micros() as u64
}

// =============================================================================
// Public types
// =============================================================================

/// Injected collaborators
#[derive(Clone)]
pub struct ScanServices {
    pub entities: Arc<dyn EntityCatalogue>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub patterns: Arc<dyn PatternCatalogue>,
    pub documents: Arc<dyn DocumentProvider>,
    pub analyzer: Arc<dyn LinguisticAnalyzer>,
    pub events: EventBus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentPhase {
    #[default]
    Idle,
    Pending,
    Scanning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseError {
    pub phase: &'static str,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleTimings {
    pub entities_us: u64,
    pub triples_us: u64,
    pub implicit_us: u64,
    pub relationships_us: u64,
    pub temporal_us: u64,
    pub total_us: u64,
}

/// Outcome of one scan cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub document_id: String,
    /// Hex, so it survives a trip through JS numbers
    pub content_hash: String,
    pub skipped: bool,
    pub changes_consumed: usize,
    pub entities_registered: usize,
    pub aliases_registered: usize,
    pub triples_persisted: usize,
    pub triples_unresolved: usize,
    pub implicit_matches: usize,
    pub mention_updates: usize,
    pub relationships_found: usize,
    pub relationships_persisted: usize,
    pub persistence_failures: usize,
    pub temporal_mentions: usize,
    pub offloaded: bool,
    /// Phases whose output hit a cap
    pub truncated: Vec<&'static str>,
    pub errors: Vec<PhaseError>,
    pub timings: CycleTimings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrchestratorStats {
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub catalogue_fetches: u64,
    pub registry_writes: u64,
    pub persistence_failures: u64,
    pub worker_timeouts: u64,
    pub cap_truncations: u64,
    /// Percentage of hash checks that found no change
    pub skip_rate: f64,
}

// =============================================================================
// Internal state
// =============================================================================

#[derive(Debug, Default)]
struct Counters {
    cycles_run: AtomicU64,
    cycles_skipped: AtomicU64,
    catalogue_fetches: AtomicU64,
    registry_writes: AtomicU64,
    persistence_failures: AtomicU64,
    worker_timeouts: AtomicU64,
    cap_truncations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct DocumentState {
    phase: DocumentPhase,
    generation: u64,
    armed: bool,
    timer: Option<JoinHandle<()>>,
    cycle_lock: Arc<tokio::sync::Mutex<()>>,
    /// Cycles running or waiting on `cycle_lock`
    queued: usize,
    /// Implicit mention counts written by the last cycle, by entity id
    mention_counts: HashMap<String, i64>,
    last_report: Option<CycleReport>,
}

/// Phase 1 output consumed by later phases
#[derive(Debug, Default)]
struct EntityOutcome {
    events: Vec<PatternMatchEvent>,
    /// Lowercased label → id for entities registered or resolved this cycle
    registered: HashMap<String, String>,
    spans: Vec<EntitySpan>,
}

// =============================================================================
// ScanOrchestrator
// =============================================================================

pub struct ScanOrchestrator {
    config: ScanConfig,
    services: ScanServices,
    detector: Mutex<ChangeDetector>,
    documents: Mutex<HashMap<String, DocumentState>>,
    triple_cortex: TripleCortex,
    relation_cortex: Arc<RelationCortex>,
    temporal_cortex: RwLock<TemporalCortex>,
    enricher: NlpEnricher,
    disambiguator: Disambiguator,
    worker: Mutex<Option<Arc<RelationWorker>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    counters: Counters,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish()
    }
}

impl ScanOrchestrator {
    pub fn new(config: ScanConfig, services: ScanServices) -> Result<Arc<Self>, ScanError> {
        Self::with_rules(config, services, RelationRules::defaults())
    }

    pub fn with_rules(
        config: ScanConfig,
        services: ScanServices,
        rules: RelationRules,
    ) -> Result<Arc<Self>, ScanError> {
        config.validate()?;
        let relation_cortex = Arc::new(RelationCortex::with_rules(config.relation.clone(), rules)?);
        let temporal_cortex = TemporalCortex::new()?;
        let enricher = NlpEnricher::new(config.enrichment.clone(), Arc::clone(&services.analyzer));
        let disambiguator = Disambiguator::new(&config.enrichment);

        Ok(Arc::new(Self {
            triple_cortex: TripleCortex::new(config.enrichment.explicit_confidence),
            relation_cortex,
            temporal_cortex: RwLock::new(temporal_cortex),
            enricher,
            disambiguator,
            detector: Mutex::new(ChangeDetector::new()),
            documents: Mutex::new(HashMap::new()),
            worker: Mutex::new(None),
            listener: Mutex::new(None),
            counters: Counters::default(),
            config,
            services,
        }))
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Start the relation worker and listen for `pattern-matched` events.
    /// Idempotent. Must be called inside a tokio runtime.
    pub fn initialize(self: &Arc<Self>) {
        let mut listener = lock(&self.listener);
        if listener.is_some() {
            return;
        }

        *lock(&self.worker) = Some(Arc::new(RelationWorker::spawn(
            Arc::clone(&self.relation_cortex),
            Arc::clone(&self.services.analyzer),
            Duration::from_millis(self.config.worker_timeout_ms),
        )));

        let mut subscription = self.services.events.subscribe();
        let weak = Arc::downgrade(self);
        *listener = Some(tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let Some(this) = weak.upgrade() else { break };
                if let ScanEvent::PatternMatched { event } = event {
                    this.handle_change(DocumentChange::new(
                        &event.document_id,
                        event.position,
                        event.end(),
                        &event.full_match,
                    ));
                }
            }
        }));
        debug!("orchestrator initialized");
    }

    /// Point temporal detection at a world calendar.
    pub fn hydrate_calendar(&self, calendar_id: &str, registry: &dyn CalendarRegistry) -> Result<(), ScanError> {
        self.temporal_cortex
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .hydrate(calendar_id, registry)
    }

    /// Record a change and (re)arm the document's debounce timer.
    /// Must be called inside a tokio runtime.
    pub fn handle_change(self: &Arc<Self>, change: DocumentChange) {
        let document_id = change.document_id.clone();
        lock(&self.detector).record(change);

        let mut documents = lock(&self.documents);
        let state = documents.entry(document_id.clone()).or_default();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.armed = true;
        if state.phase != DocumentPhase::Scanning {
            state.phase = DocumentPhase::Pending;
        }

        let generation = state.generation;
        let delay = Duration::from_millis(self.config.debounce_ms);
        let weak = Arc::downgrade(self);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else { return };
            if !this.disarm(&document_id, Some(generation)) {
                return;
            }
            // Detached so a later abort of this timer cannot cancel the cycle
            tokio::spawn(async move {
                this.run_cycle(&document_id).await;
            });
        }));
    }

    /// Clear the armed timer. With `Some(generation)` only if it is still current.
    fn disarm(&self, document_id: &str, generation: Option<u64>) -> bool {
        let mut documents = lock(&self.documents);
        let Some(state) = documents.get_mut(document_id) else {
            return false;
        };
        if let Some(generation) = generation {
            if state.generation != generation {
                return false;
            }
            state.timer = None;
        } else if let Some(timer) = state.timer.take() {
            timer.abort();
            state.generation += 1;
        }
        state.armed = false;
        true
    }

    /// Cancel any pending timer and scan now.
    pub async fn flush(&self, document_id: &str) -> CycleReport {
        self.disarm(document_id, None);
        self.run_cycle(document_id).await
    }

    pub fn document_phase(&self, document_id: &str) -> DocumentPhase {
        lock(&self.documents)
            .get(document_id)
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    pub fn pending_changes(&self, document_id: &str) -> usize {
        lock(&self.detector).pending_count(document_id)
    }

    pub fn last_report(&self, document_id: &str) -> Option<CycleReport> {
        lock(&self.documents)
            .get(document_id)
            .and_then(|s| s.last_report.clone())
    }

    pub fn stats(&self) -> OrchestratorStats {
        let c = &self.counters;
        OrchestratorStats {
            cycles_run: c.cycles_run.load(Ordering::SeqCst),
            cycles_skipped: c.cycles_skipped.load(Ordering::SeqCst),
            catalogue_fetches: c.catalogue_fetches.load(Ordering::SeqCst),
            registry_writes: c.registry_writes.load(Ordering::SeqCst),
            persistence_failures: c.persistence_failures.load(Ordering::SeqCst),
            worker_timeouts: c.worker_timeouts.load(Ordering::SeqCst),
            cap_truncations: c.cap_truncations.load(Ordering::SeqCst),
            skip_rate: lock(&self.detector).skip_rate(),
        }
    }

    /// Run one cycle for `document_id`. Cycles of the same document never overlap.
    pub async fn run_cycle(&self, document_id: &str) -> CycleReport {
        let cycle_lock = {
            let mut documents = lock(&self.documents);
            let state = documents.entry(document_id.to_string()).or_default();
            state.queued += 1;
            Arc::clone(&state.cycle_lock)
        };
        let ticket = CycleTicket {
            orchestrator: self,
            document_id,
        };
        let _guard = cycle_lock.lock().await;
        if let Some(state) = lock(&self.documents).get_mut(document_id) {
            state.phase = DocumentPhase::Scanning;
        }

        let report = self.execute_cycle(document_id).await;

        if let Some(state) = lock(&self.documents).get_mut(document_id) {
            state.last_report = Some(report.clone());
        }
        drop(ticket);
        report
    }

    /// A cycle left the queue: settle the phase from what is still waiting.
    fn release_cycle(&self, document_id: &str) {
        let mut documents = lock(&self.documents);
        let Some(state) = documents.get_mut(document_id) else {
            return;
        };
        state.queued = state.queued.saturating_sub(1);
        state.phase = if state.armed {
            DocumentPhase::Pending
        } else if state.queued > 0 {
            DocumentPhase::Scanning
        } else {
            DocumentPhase::Idle
        };
    }

    /// Drop everything held for a closed document: armed timer, phase state,
    /// mention counts, last report and change history. Waits for a running
    /// cycle to finish first.
    pub async fn forget(&self, document_id: &str) {
        self.disarm(document_id, None);
        let cycle_lock = lock(&self.documents)
            .get(document_id)
            .map(|state| Arc::clone(&state.cycle_lock));
        let _guard = match &cycle_lock {
            Some(cycle_lock) => Some(cycle_lock.lock().await),
            None => None,
        };

        if let Some(state) = lock(&self.documents).remove(document_id) {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
        lock(&self.detector).forget(document_id);
        debug!(document_id, "document forgotten");
    }

    async fn execute_cycle(&self, document_id: &str) -> CycleReport {
        let started = instant::Instant::now();
        let mut report = CycleReport {
            document_id: document_id.to_string(),
            ..Default::default()
        };

        let text = match self.services.documents.get_text(document_id).await {
            Ok(text) => text,
            Err(e) => {
                let err = ScanError::DocumentUnavailable {
                    document_id: document_id.to_string(),
                    message: e.to_string(),
                };
                self.record_error(&mut report, "document", err);
                return report;
            }
        };

        let (change, consumed) = {
            let mut detector = lock(&self.detector);
            (detector.check(document_id, &text), detector.pending_count(document_id))
        };
        report.content_hash = format!("{:x}", change.content_hash);
        report.changes_consumed = consumed;

        if !change.has_changed {
            Counters::bump(&self.counters.cycles_skipped);
            lock(&self.detector).clear_consumed(document_id, consumed);
            report.skipped = true;
            debug!(document_id, changes = consumed, "content unchanged, cycle skipped");
            return report;
        }
        Counters::bump(&self.counters.cycles_run);

        Counters::bump(&self.counters.catalogue_fetches);
        let cache = match self.services.entities.get_all().await {
            Ok(entities) => Some(Arc::new(ScanCycleCache::new(entities))),
            Err(e) => {
                self.record_error(&mut report, "catalogue", e.into_catalogue_error());
                None
            }
        };
        let mut commit = cache.is_some();

        if let Some(cache) = cache {
            let t = instant::Instant::now();
            let outcome = match self.extract_entities(document_id, &text, &cache, &mut report).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    commit &= !matches!(e, ScanError::CatalogueUnavailable(_));
                    self.record_error(&mut report, "entities", e);
                    EntityOutcome::default()
                }
            };
            report.timings.entities_us = elapsed_us(t);

            let t = instant::Instant::now();
            if let Err(e) = self.persist_triples(document_id, &text, &outcome, &cache, &mut report).await {
                self.record_error(&mut report, "triples", e);
            }
            report.timings.triples_us = elapsed_us(t);

            let t = instant::Instant::now();
            let implicit = match self.update_mentions(document_id, &text, &cache, &mut report).await {
                Ok(matches) => matches,
                Err(e) => {
                    self.record_error(&mut report, "implicit", e);
                    Vec::new()
                }
            };
            report.timings.implicit_us = elapsed_us(t);

            let t = instant::Instant::now();
            if let Err(e) = self
                .infer_relationships(document_id, &text, &outcome.spans, &implicit, &mut report)
                .await
            {
                self.record_error(&mut report, "relationships", e);
            }
            report.timings.relationships_us = elapsed_us(t);
        }

        let t = instant::Instant::now();
        self.detect_temporal(document_id, &text, &mut report);
        report.timings.temporal_us = elapsed_us(t);

        {
            let mut detector = lock(&self.detector);
            detector.clear_consumed(document_id, consumed);
            if commit {
                detector.commit(document_id, change.content_hash);
            }
        }

        report.timings.total_us = elapsed_us(started);
        info!(
            document_id,
            entities = report.entities_registered,
            triples = report.triples_persisted,
            implicit = report.implicit_matches,
            relationships = report.relationships_persisted,
            temporal = report.temporal_mentions,
            errors = report.errors.len(),
            total_us = report.timings.total_us,
            "scan cycle complete"
        );
        report
    }

    // -------------------------------------------------------------------------
    // Phase 1: entities
    // -------------------------------------------------------------------------

    async fn extract_entities(
        &self,
        document_id: &str,
        text: &str,
        cache: &ScanCycleCache,
        report: &mut CycleReport,
    ) -> Result<EntityOutcome, ScanError> {
        let patterns = self
            .services
            .patterns
            .get_active_patterns()
            .map_err(RegistryError::into_catalogue_error)?;
        let extractor = build_extractor(patterns, self.config.use_automaton_extractor)?;
        let events = extractor.extract(text, document_id);
        let enriched = self.enricher.enrich_all(&events, text);

        let mut seen = HashSet::new();
        let mut candidates: Vec<&EnrichedMatch> = enriched
            .iter()
            .filter(|m| matches!(m.event.kind, PatternKind::Entity | PatternKind::Mention))
            .filter(|m| m.confidence >= self.config.min_entity_confidence)
            .filter(|m| match (m.label(), m.entity_kind.as_deref()) {
                (Some(label), Some(kind)) => seen.insert((label.to_lowercase(), kind.to_string())),
                _ => false,
            })
            .collect();
        self.enforce_cap(document_id, &mut candidates, "entities", self.config.max_entities, report);

        let mut registered: HashMap<String, String> = HashMap::new();
        for candidate in candidates {
            let (Some(label), Some(kind)) = (candidate.label(), candidate.entity_kind.as_deref()) else {
                continue;
            };
            if let Some(existing) = cache.find(label) {
                registered.insert(label.to_lowercase(), existing.id.clone());
                continue;
            }

            let event = &candidate.event;
            let resolution =
                self.disambiguator
                    .resolve(label, Some(kind), text, event.position, event.end(), cache);

            let result = match &resolution {
                Some(res) => {
                    let options = RegisterOptions {
                        aliases: vec![label.to_string()],
                        ..Default::default()
                    };
                    debug!(document_id, surface = label, canonical = %res.label, "registering alias");
                    self.register(&res.label, &res.kind, document_id, options).await
                }
                None => {
                    let options = RegisterOptions {
                        subtype: event.capture("subtype").filter(|s| !s.is_empty()).map(str::to_string),
                        attributes: event
                            .capture("attributes")
                            .and_then(|raw| serde_json::from_str(raw).ok()),
                        aliases: Vec::new(),
                    };
                    self.register(label, kind, document_id, options).await
                }
            };

            match result {
                Ok(id) => {
                    if resolution.is_some() {
                        report.aliases_registered += 1;
                    } else {
                        report.entities_registered += 1;
                    }
                    registered.insert(label.to_lowercase(), id);
                }
                Err(RegistryError::Unavailable(message)) => return Err(ScanError::CatalogueUnavailable(message)),
                Err(e) => self.persistence_failure(document_id, label, e, report),
            }
        }

        let spans = Self::explicit_spans(&events, &registered, cache);
        Ok(EntityOutcome {
            events,
            registered,
            spans,
        })
    }

    async fn register(
        &self,
        label: &str,
        kind: &str,
        document_id: &str,
        options: RegisterOptions,
    ) -> Result<String, RegistryError> {
        Counters::bump(&self.counters.registry_writes);
        self.services
            .entities
            .register_entity(label, kind, document_id, options)
            .await
    }

    /// Spans for every explicit mention whose entity is known.
    fn explicit_spans(
        events: &[PatternMatchEvent],
        registered: &HashMap<String, String>,
        cache: &ScanCycleCache,
    ) -> Vec<EntitySpan> {
        events
            .iter()
            .filter_map(|event| {
                let label = match event.kind {
                    PatternKind::Entity => event.capture("label"),
                    PatternKind::Mention => event.capture("name"),
                    PatternKind::Wikilink | PatternKind::Backlink => event.capture("target"),
                    _ => None,
                }?;
                let (id, kind) = match registered.get(&label.to_lowercase()) {
                    Some(id) => (id.clone(), cache.get(id).map(|e| e.kind.clone())),
                    None => {
                        let entity = cache.find(label)?;
                        (entity.id.clone(), Some(entity.kind.clone()))
                    }
                };
                let kind = kind
                    .or_else(|| event.capture("entity_kind").map(str::to_string))
                    .or_else(|| (event.kind == PatternKind::Mention).then(|| "CHARACTER".to_string()));

                let mut span = EntitySpan::new(label, event.position, event.end()).with_id(&id);
                span.kind = kind;
                Some(span)
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Phase 2: triples
    // -------------------------------------------------------------------------

    async fn persist_triples(
        &self,
        document_id: &str,
        text: &str,
        outcome: &EntityOutcome,
        cache: &ScanCycleCache,
        report: &mut CycleReport,
    ) -> Result<(), ScanError> {
        let mut triples = self.triple_cortex.extract(&outcome.events, text);
        self.enforce_cap(document_id, &mut triples, "triples", self.config.max_triples, report);
        self.triple_cortex.resolve(&mut triples, cache);

        let mut registered = outcome.registered.clone();
        for triple in &mut triples {
            for end in [&mut triple.subject, &mut triple.object] {
                if end.id.is_some() {
                    continue;
                }
                let key = end.label.to_lowercase();
                if let Some(id) = registered.get(&key) {
                    end.id = Some(id.clone());
                    continue;
                }
                if end.kind == UNKNOWN_KIND {
                    continue;
                }
                match self
                    .register(&end.label, &end.kind, document_id, RegisterOptions::default())
                    .await
                {
                    Ok(id) => {
                        report.entities_registered += 1;
                        registered.insert(key, id.clone());
                        end.id = Some(id);
                    }
                    Err(RegistryError::Unavailable(message)) => {
                        return Err(ScanError::CatalogueUnavailable(message))
                    }
                    Err(e) => self.persistence_failure(document_id, &end.label, e, report),
                }
            }
        }

        for triple in triples {
            let Some(record) = Self::triple_record(document_id, &triple) else {
                debug!(document_id, subject = %triple.subject.label, object = %triple.object.label, "triple left unresolved");
                report.triples_unresolved += 1;
                continue;
            };
            if self.persist(document_id, record, report).await? {
                report.triples_persisted += 1;
            }
        }
        Ok(())
    }

    fn triple_record(document_id: &str, triple: &ExtractedTriple) -> Option<RelationshipRecord> {
        let source_id = triple.subject.id.clone()?;
        let target_id = triple.object.id.clone()?;
        let mut attributes = HashMap::new();
        attributes.insert("context".to_string(), serde_json::Value::from(triple.context.clone()));
        attributes.insert("position".to_string(), serde_json::Value::from(triple.position));
        Some(RelationshipRecord {
            source_id,
            target_id,
            relation_type: triple.predicate.clone(),
            provenance: vec![Provenance {
                source: PROVENANCE_EXPLICIT.to_string(),
                origin_id: document_id.to_string(),
                confidence: triple.confidence,
                timestamp: now_millis(),
            }],
            attributes,
        })
    }

    // -------------------------------------------------------------------------
    // Phase 3: implicit mentions
    // -------------------------------------------------------------------------

    async fn update_mentions(
        &self,
        document_id: &str,
        text: &str,
        cache: &ScanCycleCache,
        report: &mut CycleReport,
    ) -> Result<Vec<ImplicitMatch>, ScanError> {
        let cortex = ImplicitCortex::from_cache(cache, self.config.implicit.clone());
        let mut matches = cortex.find_mentions(text);
        self.enforce_cap(document_id, &mut matches, "implicit", self.config.max_implicit, report);
        report.implicit_matches = matches.len();

        let mut current: HashMap<String, i64> = HashMap::new();
        for m in &matches {
            *current.entry(m.entity_id.clone()).or_insert(0) += 1;
        }

        let mut written = lock(&self.documents)
            .get(document_id)
            .map(|s| s.mention_counts.clone())
            .unwrap_or_default();
        let ids: BTreeSet<String> = current.keys().chain(written.keys()).cloned().collect();

        let mut outcome = Ok(());
        for id in ids {
            let now = current.get(&id).copied().unwrap_or(0);
            let before = written.get(&id).copied().unwrap_or(0);
            let delta = now - before;
            if delta == 0 {
                continue;
            }

            Counters::bump(&self.counters.registry_writes);
            match self
                .services
                .entities
                .update_mention_count(&id, document_id, delta)
                .await
            {
                Ok(()) => {
                    report.mention_updates += 1;
                    if now == 0 {
                        written.remove(&id);
                    } else {
                        written.insert(id, now);
                    }
                }
                Err(RegistryError::Unavailable(message)) => {
                    outcome = Err(ScanError::CatalogueUnavailable(message));
                    break;
                }
                Err(e) => self.persistence_failure(document_id, &id, e, report),
            }
        }

        if let Some(state) = lock(&self.documents).get_mut(document_id) {
            state.mention_counts = written;
        }
        outcome.map(|()| matches)
    }

    // -------------------------------------------------------------------------
    // Phase 4: relationships
    // -------------------------------------------------------------------------

    async fn infer_relationships(
        &self,
        document_id: &str,
        text: &str,
        explicit: &[EntitySpan],
        implicit: &[ImplicitMatch],
        report: &mut CycleReport,
    ) -> Result<(), ScanError> {
        let spans = merge_spans(explicit, implicit);
        if spans.len() < 2 {
            return Ok(());
        }

        let (mut relationships, stats) = self.extract_relationships(document_id, text, spans, report).await;
        debug!(
            document_id,
            pairs = stats.pairs_scanned,
            found = stats.relationships_found,
            "relationship inference done"
        );
        self.enforce_cap(document_id, &mut relationships, "relationships", self.config.max_relationships, report);
        report.relationships_found = relationships.len();

        for relationship in &relationships {
            let Some(record) = Self::relationship_record(document_id, relationship) else {
                continue;
            };
            if self.persist(document_id, record, report).await? {
                report.relationships_persisted += 1;
            }
        }
        Ok(())
    }

    async fn extract_relationships(
        &self,
        document_id: &str,
        text: &str,
        spans: Vec<EntitySpan>,
        report: &mut CycleReport,
    ) -> (Vec<ExtractedRelationship>, RelationStats) {
        let worker = lock(&self.worker).clone();
        if let Some(worker) = worker.filter(|_| text.chars().count() > self.config.offload_threshold_chars) {
            match worker.extract(text.to_string(), spans.clone()).await {
                Ok(response) => {
                    report.offloaded = true;
                    return (response.relationships, response.stats);
                }
                Err(e) => {
                    if matches!(e, ScanError::WorkerTimeout { .. }) {
                        Counters::bump(&self.counters.worker_timeouts);
                    }
                    warn!(document_id, error = %e, "relation worker failed, extracting in-line");
                }
            }
        }

        let analysis = self.services.analyzer.analyze(text);
        self.relation_cortex.extract_with_stats(text, &spans, &analysis)
    }

    fn relationship_record(document_id: &str, relationship: &ExtractedRelationship) -> Option<RelationshipRecord> {
        let source_id = relationship.source.entity_id.clone()?;
        let target_id = relationship.target.entity_id.clone()?;
        if source_id == target_id {
            return None;
        }

        let mut attributes: HashMap<String, serde_json::Value> = relationship
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
            .collect();
        attributes.insert(
            "pattern".to_string(),
            serde_json::to_value(relationship.pattern).unwrap_or(serde_json::Value::Null),
        );
        attributes.insert("context".to_string(), serde_json::Value::from(relationship.context.clone()));

        Some(RelationshipRecord {
            source_id,
            target_id,
            relation_type: relationship.predicate.clone(),
            provenance: vec![Provenance {
                source: PROVENANCE_INFERENCE.to_string(),
                origin_id: document_id.to_string(),
                confidence: relationship.confidence,
                timestamp: now_millis(),
            }],
            attributes,
        })
    }

    // -------------------------------------------------------------------------
    // Phase 5: temporal
    // -------------------------------------------------------------------------

    fn detect_temporal(&self, document_id: &str, text: &str, report: &mut CycleReport) {
        let mentions = self
            .temporal_cortex
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .find_mentions(text);
        report.temporal_mentions = mentions.len();
        if mentions.is_empty() {
            return;
        }
        self.services.events.publish(ScanEvent::TemporalDetected {
            document_id: document_id.to_string(),
            mentions,
            full_text: text.to_string(),
        });
    }

    // -------------------------------------------------------------------------
    // Shared helpers
    // -------------------------------------------------------------------------

    /// Write one edge. `Ok(false)` when this item was rejected, `Err` when the store is down.
    async fn persist(
        &self,
        document_id: &str,
        record: RelationshipRecord,
        report: &mut CycleReport,
    ) -> Result<bool, ScanError> {
        let item = format!("{}-{}->{}", record.source_id, record.relation_type, record.target_id);
        Counters::bump(&self.counters.registry_writes);
        match self.services.relationships.add(record).await {
            Ok(()) => Ok(true),
            Err(e @ RegistryError::Unavailable(_)) => Err(e.into_persistence_error(item)),
            Err(e) => {
                self.persistence_failure(document_id, &item, e, report);
                Ok(false)
            }
        }
    }

    fn persistence_failure(&self, document_id: &str, item: &str, e: RegistryError, report: &mut CycleReport) {
        let err = e.into_persistence_error(item);
        warn!(document_id, kind = err.kind(), error = %err, "persistence failed");
        Counters::bump(&self.counters.persistence_failures);
        report.persistence_failures += 1;
    }

    fn enforce_cap<T>(
        &self,
        document_id: &str,
        items: &mut Vec<T>,
        phase: &'static str,
        cap: usize,
        report: &mut CycleReport,
    ) {
        if items.len() <= cap {
            return;
        }
        let err = ScanError::OverCapacity {
            phase,
            cap,
            found: items.len(),
        };
        warn!(document_id, phase, cap, dropped = items.len() - cap, "{}", err);
        items.truncate(cap);
        report.truncated.push(phase);
        Counters::bump(&self.counters.cap_truncations);
    }

    fn record_error(&self, report: &mut CycleReport, phase: &'static str, err: ScanError) {
        match err {
            ScanError::CatalogueUnavailable(_) | ScanError::DocumentUnavailable { .. } => {
                error!(document_id = %report.document_id, phase, kind = err.kind(), error = %err, "phase failed")
            }
            _ => warn!(document_id = %report.document_id, phase, kind = err.kind(), error = %err, "phase failed"),
        }
        report.errors.push(PhaseError {
            phase,
            kind: err.kind(),
            message: err.to_string(),
        });
    }
}

/// Keeps `DocumentState::queued` honest even when a cycle future is dropped
/// while waiting for the lock.
struct CycleTicket<'a> {
    orchestrator: &'a ScanOrchestrator,
    document_id: &'a str,
}

impl Drop for CycleTicket<'_> {
    fn drop(&mut self) {
        self.orchestrator.release_cycle(self.document_id);
    }
}

impl Drop for ScanOrchestrator {
    fn drop(&mut self) {
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        for state in lock(&self.documents).values_mut() {
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
    }
}

/// Explicit spans first; implicit matches that overlap one are dropped.
fn merge_spans(explicit: &[EntitySpan], implicit: &[ImplicitMatch]) -> Vec<EntitySpan> {
    let mut spans = explicit.to_vec();
    for m in implicit {
        let (start, end) = (m.position, m.end());
        if explicit.iter().any(|s| s.start < end && start < s.end) {
            continue;
        }
        spans.push(
            EntitySpan::new(&m.entity_label, start, end)
                .with_id(&m.entity_id)
                .with_kind(&m.entity_kind),
        );
    }
    spans.sort_by_key(|s| (s.start, s.end));
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::analyzer::{Analysis, RuleAnalyzer};
    use crate::scanner::registry::{
        BuiltinPatternCatalogue, EntityDefinition, InMemoryEntityCatalogue, InMemoryRelationshipStore,
        StaticDocumentProvider,
    };
    use crate::scanner::temporal::TemporalKind;

    const SCENARIO: &str = "[CHARACTER|Jon Snow] met [CHARACTER|Samwell Tarly].";

    struct Fixture {
        orchestrator: Arc<ScanOrchestrator>,
        catalogue: Arc<InMemoryEntityCatalogue>,
        store: Arc<InMemoryRelationshipStore>,
        documents: Arc<StaticDocumentProvider>,
        events: EventBus,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn fixture_with(config: ScanConfig, catalogue: InMemoryEntityCatalogue, analyzer: Arc<dyn LinguisticAnalyzer>) -> Fixture {
        init_tracing();
        let catalogue = Arc::new(catalogue);
        let store = Arc::new(InMemoryRelationshipStore::new());
        let documents = Arc::new(StaticDocumentProvider::new());
        let events = EventBus::new();
        let services = ScanServices {
            entities: catalogue.clone(),
            relationships: store.clone(),
            patterns: Arc::new(BuiltinPatternCatalogue::new().unwrap()),
            documents: documents.clone(),
            analyzer,
            events: events.clone(),
        };
        Fixture {
            orchestrator: ScanOrchestrator::new(config, services).unwrap(),
            catalogue,
            store,
            documents,
            events,
        }
    }

    fn fixture(config: ScanConfig) -> Fixture {
        fixture_with(config, InMemoryEntityCatalogue::new(), Arc::new(RuleAnalyzer::new()))
    }

    fn edit(doc: &str, at: usize, text: &str) -> DocumentChange {
        DocumentChange::new(doc, at, at + text.len(), text)
    }

    // -------------------------------------------------------------------------
    // Requirement 1: Explicit entities are registered and related
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_scenario_explicit_entities() {
        let f = fixture(ScanConfig::immediate());
        f.documents.set_text("doc", SCENARIO);

        let report = f.orchestrator.run_cycle("doc").await;

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.entities_registered, 2);
        let entities = f.catalogue.entities();
        assert_eq!(entities.len(), 2);
        assert!(entities.iter().all(|e| e.kind == "CHARACTER"));

        let jon = entities.iter().find(|e| e.label == "Jon Snow").unwrap();
        let sam = entities.iter().find(|e| e.label == "Samwell Tarly").unwrap();
        let records = f.store.records();
        let knows = |from: &str, to: &str| {
            records
                .iter()
                .find(|r| r.relation_type == "KNOWS" && r.source_id == from && r.target_id == to)
        };
        let forward = knows(&jon.id, &sam.id).expect("KNOWS edge");
        assert!(forward.provenance[0].confidence >= 0.65);
        assert_eq!(forward.provenance[0].source, "inference");
        assert_eq!(forward.provenance[0].origin_id, "doc");
        assert!(knows(&sam.id, &jon.id).is_some(), "symmetric rule");
    }

    // -------------------------------------------------------------------------
    // Requirement 2: Bursts inside the debounce window coalesce
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces() {
        let f = fixture(ScanConfig::default());
        f.documents.set_text("doc", SCENARIO);

        f.orchestrator.handle_change(edit("doc", 0, "[CHARACTER|Jon Snow]"));
        assert_eq!(f.orchestrator.document_phase("doc"), DocumentPhase::Pending);
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.orchestrator.handle_change(edit("doc", 25, "[CHARACTER|Samwell Tarly]"));
        assert_eq!(f.orchestrator.pending_changes("doc"), 2);

        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(f.orchestrator.stats().cycles_run, 1);
        assert_eq!(f.orchestrator.pending_changes("doc"), 0);
        assert_eq!(f.orchestrator.document_phase("doc"), DocumentPhase::Idle);
        let report = f.orchestrator.last_report("doc").unwrap();
        assert_eq!(report.changes_consumed, 2);
        assert_eq!(report.entities_registered, 2);
    }

    // -------------------------------------------------------------------------
    // Requirement 3: Nothing fires before the window closes
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_debounce_restarts_timer() {
        let f = fixture(ScanConfig::default());
        f.documents.set_text("doc", SCENARIO);

        f.orchestrator.handle_change(edit("doc", 0, "a"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        f.orchestrator.handle_change(edit("doc", 1, "b"));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.orchestrator.stats().cycles_run, 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.orchestrator.stats().cycles_run, 1);
    }

    // -------------------------------------------------------------------------
    // Requirement 4: Unchanged content writes nothing
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_idempotent_rescan() {
        let f = fixture(ScanConfig::immediate());
        f.documents.set_text("doc", SCENARIO);

        f.orchestrator.run_cycle("doc").await;
        let writes = f.catalogue.write_count();
        let adds = f.store.add_calls();
        let fetches = f.catalogue.get_all_calls();
        let registry_writes = f.orchestrator.stats().registry_writes;

        let report = f.orchestrator.run_cycle("doc").await;

        assert!(report.skipped);
        assert_eq!(f.catalogue.write_count(), writes);
        assert_eq!(f.store.add_calls(), adds);
        assert_eq!(f.catalogue.get_all_calls(), fetches);
        let stats = f.orchestrator.stats();
        assert_eq!(stats.registry_writes, registry_writes);
        assert_eq!(stats.cycles_skipped, 1);
        assert_eq!(stats.cycles_run, 1);
    }

    // -------------------------------------------------------------------------
    // Requirement 5: One catalogue fetch per cycle
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_single_catalogue_fetch() {
        let catalogue = InMemoryEntityCatalogue::with_entities(vec![EntityDefinition {
            id: "character-frodo".to_string(),
            label: "Frodo".to_string(),
            kind: "CHARACTER".to_string(),
            aliases: vec![],
        }]);
        let f = fixture_with(ScanConfig::immediate(), catalogue, Arc::new(RuleAnalyzer::new()));
        f.documents.set_text(
            "doc",
            "[CHARACTER|Sam] ->KNOWS-> [CHARACTER|Frodo]. Frodo met [CHARACTER|Sam] on Monday.",
        );

        let report = f.orchestrator.run_cycle("doc").await;

        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert_eq!(report.triples_persisted, 1);
        assert!(report.implicit_matches >= 1);
        assert_eq!(report.temporal_mentions, 1);
        assert_eq!(f.catalogue.get_all_calls(), 1);
        assert_eq!(f.orchestrator.stats().catalogue_fetches, 1);
    }

    // -------------------------------------------------------------------------
    // Requirement 6: Caps truncate and the cycle still completes
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_entity_cap() {
        let config = ScanConfig {
            max_entities: 3,
            ..ScanConfig::immediate()
        };
        let f = fixture(config);
        f.documents.set_text(
            "doc",
            "[CHARACTER|Alpha] [CHARACTER|Bravo] [CHARACTER|Charlie] [CHARACTER|Delta] [CHARACTER|Echo] on Monday.",
        );

        let report = f.orchestrator.run_cycle("doc").await;

        assert_eq!(report.entities_registered, 3);
        assert_eq!(f.catalogue.entities().len(), 3);
        assert_eq!(report.truncated, vec!["entities"]);
        assert_eq!(f.orchestrator.stats().cap_truncations, 1);
        assert_eq!(report.temporal_mentions, 1);
        assert!(report.errors.is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 7: A failing relationship phase is isolated
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_phase_four_failure_isolated() {
        let catalogue = InMemoryEntityCatalogue::with_entities(vec![EntityDefinition {
            id: "character-frodo".to_string(),
            label: "Frodo".to_string(),
            kind: "CHARACTER".to_string(),
            aliases: vec![],
        }]);
        let f = fixture_with(ScanConfig::immediate(), catalogue, Arc::new(RuleAnalyzer::new()));
        f.store.set_offline(true);
        let mut events = f.events.subscribe();
        f.documents.set_text("doc", "On Monday, Frodo met [CHARACTER|Sam].");

        let report = f.orchestrator.run_cycle("doc").await;

        assert_eq!(report.entities_registered, 1);
        assert_eq!(report.mention_updates, 1);
        assert_eq!(f.catalogue.mention_count("character-frodo", "doc"), 1);
        assert_eq!(report.relationships_persisted, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].phase, "relationships");
        assert_eq!(report.errors[0].kind, "persistence_failure");

        assert_eq!(report.temporal_mentions, 1);
        match events.try_recv() {
            Some(ScanEvent::TemporalDetected { document_id, mentions, .. }) => {
                assert_eq!(document_id, "doc");
                assert_eq!(mentions[0].kind, TemporalKind::Weekday);
            }
            other => panic!("expected temporal event, got {:?}", other),
        }
    }

    // -------------------------------------------------------------------------
    // Requirement 8: Catalogue outage skips entity phases but not temporal
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_catalogue_outage() {
        let f = fixture(ScanConfig::immediate());
        f.catalogue.set_offline(true);
        f.documents.set_text("doc", "On Monday [CHARACTER|Arya] left.");

        let report = f.orchestrator.run_cycle("doc").await;
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, "catalogue_unavailable");
        assert_eq!(report.entities_registered, 0);
        assert_eq!(report.temporal_mentions, 1);

        // Hash was not committed, so recovery rescans the same text
        f.catalogue.set_offline(false);
        let report = f.orchestrator.run_cycle("doc").await;
        assert!(!report.skipped);
        assert_eq!(report.entities_registered, 1);
    }

    // -------------------------------------------------------------------------
    // Requirement 9: Malformed brackets produce nothing and do not fail
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_malformed_bracket() {
        let f = fixture(ScanConfig::immediate());
        f.documents.set_text("doc", "[ not valid");

        let report = f.orchestrator.run_cycle("doc").await;

        assert!(report.errors.is_empty());
        assert_eq!(report.entities_registered, 0);
        assert!(f.catalogue.entities().is_empty());
        assert!(f.store.records().is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 10: Mention counts are written as deltas
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_mention_deltas() {
        let catalogue = InMemoryEntityCatalogue::with_entities(vec![EntityDefinition {
            id: "character-frodo".to_string(),
            label: "Frodo".to_string(),
            kind: "CHARACTER".to_string(),
            aliases: vec![],
        }]);
        let f = fixture_with(ScanConfig::immediate(), catalogue, Arc::new(RuleAnalyzer::new()));

        f.documents.set_text("doc", "Frodo ran. Frodo hid.");
        f.orchestrator.run_cycle("doc").await;
        assert_eq!(f.catalogue.mention_count("character-frodo", "doc"), 2);

        f.documents.set_text("doc", "Frodo ran. Then he hid.");
        let report = f.orchestrator.run_cycle("doc").await;
        assert_eq!(report.mention_updates, 1);
        assert_eq!(f.catalogue.mention_count("character-frodo", "doc"), 1);

        f.documents.set_text("doc", "Frodo ran. Then he hid!");
        let report = f.orchestrator.run_cycle("doc").await;
        assert_eq!(report.mention_updates, 0);
    }

    // -------------------------------------------------------------------------
    // Requirement 11: Surface forms resolve to existing entities as aliases
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_disambiguated_alias() {
        let catalogue = InMemoryEntityCatalogue::with_entities(vec![EntityDefinition {
            id: "character-1".to_string(),
            label: "Jon Snow".to_string(),
            kind: "CHARACTER".to_string(),
            aliases: vec![],
        }]);
        let f = fixture_with(ScanConfig::immediate(), catalogue, Arc::new(RuleAnalyzer::new()));
        f.documents.set_text("doc", "Jon Snow rode north. Later [CHARACTER|Snow] slept.");

        let report = f.orchestrator.run_cycle("doc").await;

        assert_eq!(report.aliases_registered, 1);
        assert_eq!(report.entities_registered, 0);
        let entities = f.catalogue.entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].aliases, vec!["Snow".to_string()]);
    }

    // -------------------------------------------------------------------------
    // Requirement 12: Pattern events on the bus drive the orchestrator
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_listener_drives_cycles() {
        let f = fixture(ScanConfig::default());
        f.orchestrator.initialize();
        f.orchestrator.initialize();
        f.documents.set_text("doc", SCENARIO);

        f.events.publish(ScanEvent::PatternMatched {
            event: PatternMatchEvent {
                kind: PatternKind::Entity,
                full_match: "[CHARACTER|Jon Snow]".to_string(),
                position: 0,
                length: 20,
                captures: HashMap::new(),
                pattern_id: "entity".to_string(),
                document_id: "doc".to_string(),
                timestamp: 0,
            },
        });
        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(f.orchestrator.stats().cycles_run, 1);
        assert_eq!(f.catalogue.entities().len(), 2);
    }

    // -------------------------------------------------------------------------
    // Requirement 13: Large documents go through the worker
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn test_offload_to_worker() {
        let config = ScanConfig {
            offload_threshold_chars: 10,
            ..ScanConfig::immediate()
        };
        let f = fixture(config);
        f.orchestrator.initialize();
        f.documents.set_text("doc", SCENARIO);

        let report = f.orchestrator.run_cycle("doc").await;

        assert!(report.offloaded);
        assert!(report.relationships_persisted >= 2);
        assert!(f.store.records().iter().any(|r| r.relation_type == "KNOWS"));
    }

    struct SlowAnalyzer(RuleAnalyzer);

    impl LinguisticAnalyzer for SlowAnalyzer {
        fn analyze(&self, text: &str) -> Analysis {
            std::thread::sleep(Duration::from_millis(200));
            self.0.analyze(text)
        }
    }

    // -------------------------------------------------------------------------
    // Requirement 14: Worker timeout falls back to in-line extraction
    // -------------------------------------------------------------------------
    #[tokio::test]
    async fn test_worker_timeout_fallback() {
        let config = ScanConfig {
            offload_threshold_chars: 10,
            worker_timeout_ms: 20,
            ..ScanConfig::immediate()
        };
        let f = fixture_with(config, InMemoryEntityCatalogue::new(), Arc::new(SlowAnalyzer(RuleAnalyzer::new())));
        f.orchestrator.initialize();
        f.documents.set_text("doc", SCENARIO);

        let report = f.orchestrator.run_cycle("doc").await;

        assert!(!report.offloaded);
        assert_eq!(f.orchestrator.stats().worker_timeouts, 1);
        assert!(report.errors.is_empty());
        assert!(f.store.records().iter().any(|r| r.relation_type == "KNOWS"));
    }

    // -------------------------------------------------------------------------
    // Requirement 15: Forgetting a document releases its state
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_forget_releases_document() {
        let f = fixture(ScanConfig::default());
        f.documents.set_text("doc", SCENARIO);

        f.orchestrator.handle_change(edit("doc", 0, "[CHARACTER|Jon Snow]"));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(f.orchestrator.stats().cycles_run, 1);
        assert!(f.orchestrator.last_report("doc").is_some());

        f.orchestrator.handle_change(edit("doc", 0, "x"));
        f.orchestrator.forget("doc").await;

        assert!(!lock(&f.orchestrator.documents).contains_key("doc"));
        assert_eq!(lock(&f.orchestrator.detector).last_hash("doc"), None);
        assert_eq!(f.orchestrator.pending_changes("doc"), 0);
        assert!(f.orchestrator.last_report("doc").is_none());
        assert_eq!(f.orchestrator.document_phase("doc"), DocumentPhase::Idle);

        // The armed timer died with the document
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(f.orchestrator.stats().cycles_run, 1);

        // No remembered hash, so the next cycle scans again
        let report = f.orchestrator.run_cycle("doc").await;
        assert!(!report.skipped);
    }

    // -------------------------------------------------------------------------
    // Requirement 16: A queued cycle keeps the document Scanning
    // -------------------------------------------------------------------------
    #[tokio::test(start_paused = true)]
    async fn test_phase_scanning_while_cycle_queued() {
        let f = fixture(ScanConfig::immediate());
        f.documents.set_text("doc", SCENARIO);

        // Stand in for a running cycle: take a queue slot and the lock
        let cycle_lock = {
            let mut documents = lock(&f.orchestrator.documents);
            let state = documents.entry("doc".to_string()).or_default();
            state.queued += 1;
            state.phase = DocumentPhase::Scanning;
            Arc::clone(&state.cycle_lock)
        };
        let running = cycle_lock.lock().await;
        let ticket = CycleTicket {
            orchestrator: f.orchestrator.as_ref(),
            document_id: "doc",
        };

        let orchestrator = Arc::clone(&f.orchestrator);
        let queued = tokio::spawn(async move { orchestrator.run_cycle("doc").await });
        tokio::task::yield_now().await;
        assert_eq!(lock(&f.orchestrator.documents)["doc"].queued, 2);

        drop(ticket);
        assert_eq!(f.orchestrator.document_phase("doc"), DocumentPhase::Scanning);

        drop(running);
        let report = queued.await.unwrap();
        assert!(!report.skipped);
        assert_eq!(f.orchestrator.document_phase("doc"), DocumentPhase::Idle);
        assert_eq!(lock(&f.orchestrator.documents)["doc"].queued, 0);
    }

}
