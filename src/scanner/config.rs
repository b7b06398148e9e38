//! Configuration types and defaults for the scanner
//!
//! Every heuristic constant used by the extraction phases lives here so it can
//! be tuned per deployment. Defaults match the documented behavior.

use serde::{Deserialize, Serialize};

use crate::scanner::error::ScanError;

// =============================================================================
// Orchestrator
// =============================================================================

/// Top-level scan configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Quiet period before a pending document is scanned. Default: 500
    pub debounce_ms: u64,
    /// Max registered entities per cycle. Default: 200
    pub max_entities: usize,
    /// Max persisted triples per cycle. Default: 200
    pub max_triples: usize,
    /// Max implicit mentions per cycle. Default: 500
    pub max_implicit: usize,
    /// Max persisted relationships per cycle. Default: 500
    pub max_relationships: usize,
    /// Documents longer than this (in chars) send relationship inference to
    /// the worker. Default: 20_000
    pub offload_threshold_chars: usize,
    /// Deadline for a worker reply before falling back. Default: 2000
    pub worker_timeout_ms: u64,
    /// Enriched matches below this confidence are not registered. Default: 0.5
    pub min_entity_confidence: f64,
    /// Use the discriminator-accelerated extractor. Default: true
    pub use_automaton_extractor: bool,
    pub relation: RelationConfig,
    pub implicit: ImplicitConfig,
    pub enrichment: EnrichmentConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_entities: 200,
            max_triples: 200,
            max_implicit: 500,
            max_relationships: 500,
            offload_threshold_chars: 20_000,
            worker_timeout_ms: 2_000,
            min_entity_confidence: 0.5,
            use_automaton_extractor: true,
            relation: RelationConfig::default(),
            implicit: ImplicitConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

impl ScanConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ScanError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Preset for tests and interactive tools: no debounce delay.
    pub fn immediate() -> Self {
        Self {
            debounce_ms: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ScanError::InvalidConfig(format!("{name} must be within [0, 1], got {v}")))
            }
        };
        unit("min_entity_confidence", self.min_entity_confidence)?;
        unit("relation.co_occurrence_min_strength", self.relation.co_occurrence_min_strength)?;
        unit("relation.co_occurrence_weight", self.relation.co_occurrence_weight)?;
        unit("relation.svo_fallback_confidence", self.relation.svo_fallback_confidence)?;
        unit("relation.possession_confidence", self.relation.possession_confidence)?;
        unit("implicit.leet_confidence", self.implicit.leet_confidence)?;
        unit("enrichment.disambiguation_threshold", self.enrichment.disambiguation_threshold)?;
        if self.relation.co_occurrence_max_proximity == 0 {
            return Err(ScanError::InvalidConfig(
                "relation.co_occurrence_max_proximity must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Relationship extraction
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationConfig {
    /// SVO/PREP pairing window in tokens. Default: 10
    pub max_token_distance: usize,
    /// Possessive lookahead in chars. Default: 20
    pub possession_window: usize,
    /// Span-based strategies skip gaps wider than this. Default: 200
    pub max_span_gap: usize,
    /// Distance at which co-occurrence strength bottoms out. Default: 100
    pub co_occurrence_max_proximity: usize,
    /// Co-occurrence below this strength is dropped. Default: 0.3
    pub co_occurrence_min_strength: f64,
    /// Multiplier turning strength into confidence. Default: 0.5
    pub co_occurrence_weight: f64,
    /// Emit co-occurrence edges at all. Default: true
    pub enable_co_occurrence: bool,
    /// Confidence for an SVO pair whose verb has no rule. Default: 0.6
    pub svo_fallback_confidence: f64,
    /// Default: 0.8
    pub possession_confidence: f64,
    /// Dedup adds `boost * incoming` to the kept confidence. Default: 0.2
    pub dedup_boost: f64,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            max_token_distance: 10,
            possession_window: 20,
            max_span_gap: 200,
            co_occurrence_max_proximity: 100,
            co_occurrence_min_strength: 0.3,
            co_occurrence_weight: 0.5,
            enable_co_occurrence: true,
            svo_fallback_confidence: 0.6,
            possession_confidence: 0.8,
            dedup_boost: 0.2,
        }
    }
}

// =============================================================================
// Implicit matching
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImplicitConfig {
    /// Shorter labels/aliases are never indexed. Default: 3
    pub min_label_len: usize,
    /// Build the automaton. When false the naive path is used. Default: true
    pub use_automaton: bool,
    /// Default: 0.6
    pub leet_confidence: f64,
    /// Confidence for explicit aliases. Default: 0.95
    pub alias_confidence: f64,
    /// Generate surname/acronym aliases for multi-word labels. Default: true
    pub smart_aliases: bool,
}

impl Default for ImplicitConfig {
    fn default() -> Self {
        Self {
            min_label_len: 3,
            use_automaton: true,
            leet_confidence: 0.6,
            alias_confidence: 0.95,
            smart_aliases: true,
        }
    }
}

// =============================================================================
// Enrichment & disambiguation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Explicit entity/triple syntax. Default: 0.95
    pub explicit_confidence: f64,
    /// Wikilinks and backlinks. Default: 0.90
    pub link_confidence: f64,
    /// Tags and mentions. Default: 0.85
    pub tag_confidence: f64,
    /// Default: 0.75
    pub temporal_confidence: f64,
    /// Anything else. Default: 0.70
    pub default_confidence: f64,
    /// Multiplier when the POS window matches. Default: 1.2
    pub pos_boost: f64,
    /// Multiplier for proper-noun chunk membership. Default: 1.1
    pub chunk_boost: f64,
    /// Resolutions at or below this are rejected. Default: 0.7
    pub disambiguation_threshold: f64,
    /// Chars either side of a mention considered "nearby". Default: 200
    pub context_window: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            explicit_confidence: 0.95,
            link_confidence: 0.90,
            tag_confidence: 0.85,
            temporal_confidence: 0.75,
            default_confidence: 0.70,
            pos_boost: 1.2,
            chunk_boost: 1.1,
            disambiguation_threshold: 0.7,
            context_window: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.max_entities, 200);
        assert_eq!(config.relation.max_token_distance, 10);
        assert!((config.enrichment.pos_boost - 1.2).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = ScanConfig::from_json(r#"{"debounce_ms": 50, "relation": {"dedup_boost": 0.1}}"#)
            .unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.max_implicit, 500);
        assert!((config.relation.dedup_boost - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.relation.possession_window, 20);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let err = ScanConfig::from_json(r#"{"implicit": {"leet_confidence": 1.5}}"#).unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));

        let err = ScanConfig::from_json("not json").unwrap_err();
        assert_eq!(err.kind(), "invalid_config");
    }
}
