//! DocumentCortex: single-call synchronous scanner
//!
//! One `scan()` runs every extractor over a text and returns everything it
//! found, without touching any registry:
//! - Pattern events (bracket syntax, links, tags, mentions), enriched
//! - Triples, resolved against the hydrated entities
//! - Implicit entity mentions
//! - Relationships between explicit, implicit and caller-supplied spans
//! - Temporal expressions
//!
//! Designed for WASM with a single cross-boundary call per scan.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::scanner::analyzer::{LinguisticAnalyzer, RuleAnalyzer};
use crate::scanner::cache::ScanCycleCache;
use crate::scanner::change::ChangeDetector;
use crate::scanner::config::ScanConfig;
use crate::scanner::enrich::{EnrichedMatch, NlpEnricher};
use crate::scanner::error::ScanError;
use crate::scanner::implicit::{ImplicitCortex, ImplicitMatch};
use crate::scanner::registry::EntityDefinition;
use crate::scanner::relation::{span_in_bounds, EntitySpan, ExtractedRelationship, RelationCortex};
use crate::scanner::syntax::{build_extractor, default_patterns, PatternExtractor, PatternKind};
use crate::scanner::temporal::{CalendarDefinition, TemporalCortex, TemporalMention};
use crate::scanner::triple::{ExtractedTriple, TripleCortex};

/// Change-detector key; the facade scans one document at a time.
const DOCUMENT_KEY: &str = "document";

// =============================================================================
// Types
// =============================================================================

/// Timing statistics for each scan phase
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanTimings {
    pub total_us: u64,
    pub syntax_us: u64,
    pub triple_us: u64,
    pub implicit_us: u64,
    pub relation_us: u64,
    pub temporal_us: u64,
}

/// Aggregate statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScanStats {
    pub timings: ScanTimings,
    /// Content hash as hex string (u64 would overflow JS Number.MAX_SAFE_INTEGER)
    pub content_hash: String,
    pub was_skipped: bool,
    pub events_found: usize,
    pub triples_found: usize,
    pub implicit_found: usize,
    pub relations_found: usize,
    pub temporal_found: usize,
}

/// Unified scan result
#[derive(Debug, Clone, Serialize, Default)]
pub struct ScanResult {
    pub events: Vec<EnrichedMatch>,
    pub triples: Vec<ExtractedTriple>,
    pub implicit: Vec<ImplicitMatch>,
    pub relations: Vec<ExtractedRelationship>,
    pub temporal: Vec<TemporalMention>,
    pub stats: ScanStats,
}

// =============================================================================
// DocumentCortex
// =============================================================================

#[wasm_bindgen]
pub struct DocumentCortex {
    extractor: Box<dyn PatternExtractor>,
    enricher: NlpEnricher,
    analyzer: Arc<dyn LinguisticAnalyzer>,
    triple_cortex: TripleCortex,
    implicit_cortex: ImplicitCortex,
    relation_cortex: RelationCortex,
    temporal_cortex: TemporalCortex,
    entities: ScanCycleCache,
    config: ScanConfig,

    change_detector: ChangeDetector,
    last_result: Option<ScanResult>,
}

#[wasm_bindgen]
impl DocumentCortex {
    #[wasm_bindgen(constructor)]
    pub fn js_new() -> Result<DocumentCortex, JsValue> {
        Self::new().map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Indexed implicit-match patterns (labels, aliases, generated aliases)
    #[wasm_bindgen(js_name = implicitPatternCount)]
    pub fn implicit_pattern_count(&self) -> usize {
        self.implicit_cortex.pattern_count()
    }

    #[wasm_bindgen(js_name = syntaxPatternCount)]
    pub fn syntax_pattern_count(&self) -> usize {
        self.extractor.pattern_count()
    }

    #[wasm_bindgen(js_name = skipRate)]
    pub fn skip_rate(&self) -> f64 {
        self.change_detector.skip_rate()
    }

    #[wasm_bindgen(js_name = reset)]
    pub fn js_reset(&mut self) {
        self.reset();
    }

    #[wasm_bindgen(js_name = hydrateEntities)]
    pub fn js_hydrate_entities(&mut self, entities: JsValue) -> Result<(), JsValue> {
        let entities: Vec<EntityDefinition> = serde_wasm_bindgen::from_value(entities)
            .map_err(|e| JsValue::from_str(&format!("Failed to parse entities: {}", e)))?;
        self.hydrate_entities(entities);
        Ok(())
    }

    #[wasm_bindgen(js_name = hydrateCalendar)]
    pub fn js_hydrate_calendar(&mut self, calendar: JsValue) -> Result<(), JsValue> {
        let calendar: CalendarDefinition = serde_wasm_bindgen::from_value(calendar)
            .map_err(|e| JsValue::from_str(&format!("Failed to parse calendar: {}", e)))?;
        self.hydrate_calendar(calendar)
            .map_err(|e| JsValue::from_str(&format!("Failed to hydrate calendar: {}", e)))
    }

    /// entity_spans: `[{ label, start, end, entity_id?, kind? }]`, may be empty
    #[wasm_bindgen(js_name = scan)]
    pub fn js_scan(&mut self, text: &str, entity_spans: JsValue) -> Result<JsValue, JsValue> {
        let spans: Vec<EntitySpan> = if entity_spans.is_undefined() || entity_spans.is_null() {
            Vec::new()
        } else {
            serde_wasm_bindgen::from_value(entity_spans)
                .map_err(|e| JsValue::from_str(&format!("Failed to parse entity spans: {}", e)))?
        };

        let result = self.scan(text, &spans);
        match serde_wasm_bindgen::to_value(&result) {
            Ok(v) => Ok(v),
            Err(e) => {
                web_sys::console::error_1(&format!("[DocumentCortex] Serialization failed: {:?}", e).into());
                Ok(JsValue::NULL)
            }
        }
    }
}

impl DocumentCortex {
    pub fn new() -> Result<Self, ScanError> {
        Self::with_config(ScanConfig::default())
    }

    pub fn with_config(config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        let analyzer: Arc<dyn LinguisticAnalyzer> = Arc::new(RuleAnalyzer::new());
        Ok(Self {
            extractor: build_extractor(default_patterns()?, config.use_automaton_extractor)?,
            enricher: NlpEnricher::new(config.enrichment.clone(), Arc::clone(&analyzer)),
            analyzer,
            triple_cortex: TripleCortex::new(config.enrichment.explicit_confidence),
            implicit_cortex: ImplicitCortex::new(config.implicit.clone()),
            relation_cortex: RelationCortex::new(config.relation.clone())?,
            temporal_cortex: TemporalCortex::new()?,
            entities: ScanCycleCache::default(),
            config,
            change_detector: ChangeDetector::new(),
            last_result: None,
        })
    }

    /// Replace the known entities. Forces the next scan to run.
    pub fn hydrate_entities(&mut self, entities: Vec<EntityDefinition>) {
        self.implicit_cortex.hydrate(&entities);
        self.entities = ScanCycleCache::new(entities);
        self.reset();
    }

    pub fn hydrate_calendar(&mut self, calendar: CalendarDefinition) -> Result<(), ScanError> {
        self.temporal_cortex.hydrate_calendar(calendar)?;
        self.reset();
        Ok(())
    }

    /// Run every extractor over `text`.
    ///
    /// Explicit entity syntax and implicit mentions become relationship
    /// anchors on their own; `external_spans` only add anchors that do not
    /// overlap those.
    pub fn scan(&mut self, text: &str, external_spans: &[EntitySpan]) -> ScanResult {
        let overall_start = instant::Instant::now();

        let change = self.change_detector.check(DOCUMENT_KEY, text);
        if !change.has_changed {
            if let Some(cached) = &self.last_result {
                let mut result = cached.clone();
                result.stats.was_skipped = true;
                result.stats.timings.total_us = overall_start.elapsed().as_micros() as u64;
                return result;
            }
        }

        let mut result = ScanResult::default();
        result.stats.content_hash = format!("{:x}", change.content_hash);

        // Phase 1: syntax events
        let t = instant::Instant::now();
        let events = self.extractor.extract(text, DOCUMENT_KEY);
        result.events = self.enricher.enrich_all(&events, text);
        result.stats.timings.syntax_us = t.elapsed().as_micros() as u64;

        // Phase 2: triples
        let t = instant::Instant::now();
        result.triples = self.triple_cortex.extract(&events, text);
        self.triple_cortex.resolve(&mut result.triples, &self.entities);
        result.stats.timings.triple_us = t.elapsed().as_micros() as u64;

        // Phase 3: implicit mentions
        let t = instant::Instant::now();
        result.implicit = self.implicit_cortex.find_mentions(text);
        result.stats.timings.implicit_us = t.elapsed().as_micros() as u64;

        // Phase 4: relationships over every anchor we have
        let t = instant::Instant::now();
        let spans = self.collect_spans(text, &result, external_spans);
        let analysis = self.analyzer.analyze(text);
        result.relations = self.relation_cortex.extract(text, &spans, &analysis);
        result.stats.timings.relation_us = t.elapsed().as_micros() as u64;

        // Phase 5: temporal
        let t = instant::Instant::now();
        result.temporal = self.temporal_cortex.find_mentions(text);
        result.stats.timings.temporal_us = t.elapsed().as_micros() as u64;

        result.stats.events_found = result.events.len();
        result.stats.triples_found = result.triples.len();
        result.stats.implicit_found = result.implicit.len();
        result.stats.relations_found = result.relations.len();
        result.stats.temporal_found = result.temporal.len();
        result.stats.timings.total_us = overall_start.elapsed().as_micros() as u64;

        self.change_detector.commit(DOCUMENT_KEY, change.content_hash);
        self.last_result = Some(result.clone());
        result
    }

    fn collect_spans(&self, text: &str, result: &ScanResult, external: &[EntitySpan]) -> Vec<EntitySpan> {
        let mut spans: Vec<EntitySpan> = result
            .events
            .iter()
            .filter(|m| m.event.kind == PatternKind::Entity)
            .filter_map(|m| {
                if m.confidence < self.config.min_entity_confidence {
                    return None;
                }
                let label = m.label()?;
                let mut span = EntitySpan::new(label, m.event.position, m.event.end());
                span.kind = m.entity_kind.clone();
                if let Some(entity) = self.entities.find(label) {
                    span.entity_id = Some(entity.id.clone());
                }
                Some(span)
            })
            .collect();

        let overlaps = |spans: &[EntitySpan], start: usize, end: usize| {
            spans.iter().any(|s| s.start < end && start < s.end)
        };

        for mention in &result.implicit {
            if !overlaps(&spans, mention.position, mention.end()) {
                spans.push(
                    EntitySpan::new(&mention.entity_label, mention.position, mention.end())
                        .with_id(&mention.entity_id)
                        .with_kind(&mention.entity_kind),
                );
            }
        }
        for ext in external {
            if !span_in_bounds(text, ext) {
                continue;
            }
            if !overlaps(&spans, ext.start, ext.end) {
                spans.push(ext.clone());
            }
        }

        spans.sort_by_key(|s| (s.start, s.end));
        spans
    }

    pub fn reset(&mut self) {
        self.change_detector.reset();
        self.last_result = None;
    }

    pub fn last_result(&self) -> Option<&ScanResult> {
        self.last_result.as_ref()
    }
}

// =============================================================================
// Tests
// =============================================================================
