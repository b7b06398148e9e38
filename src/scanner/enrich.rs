//! NLP enrichment and disambiguation
//!
//! `NlpEnricher` scores pattern matches: explicit bracket syntax keeps its base
//! confidence, everything else is checked against the part-of-speech window
//! around it. `Disambiguator` maps a surface string onto an already known
//! entity so it can be stored as an alias instead of a duplicate.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::scanner::analyzer::{Analysis, LinguisticAnalyzer, PosTag};
use crate::scanner::cache::ScanCycleCache;
use crate::scanner::config::EnrichmentConfig;
use crate::scanner::syntax::{PatternKind, PatternMatchEvent};
use crate::scanner::triple::sentence_around;

/// POS expectations either side of a mention of the given entity kind.
struct PosWindow {
    kinds: &'static [&'static str],
    before: &'static [PosTag],
    after: &'static [PosTag],
}

const POS_WINDOWS: &[PosWindow] = &[
    PosWindow {
        kinds: &["CHARACTER", "PERSON", "NPC"],
        before: &[PosTag::Determiner, PosTag::Pronoun],
        after: &[PosTag::Verb, PosTag::Auxiliary, PosTag::Modal],
    },
    PosWindow {
        kinds: &["LOCATION", "PLACE"],
        before: &[PosTag::Preposition],
        after: &[PosTag::Punctuation, PosTag::Conjunction],
    },
    PosWindow {
        kinds: &["ITEM", "ARTIFACT", "OBJECT"],
        before: &[PosTag::Determiner, PosTag::Possessive],
        after: &[PosTag::Verb, PosTag::Auxiliary],
    },
    PosWindow {
        kinds: &["FACTION", "ORGANIZATION", "GROUP"],
        before: &[PosTag::Determiner, PosTag::Preposition],
        after: &[PosTag::Verb, PosTag::Auxiliary],
    },
];

fn pos_window(kind: &str) -> Option<&'static PosWindow> {
    POS_WINDOWS
        .iter()
        .find(|w| w.kinds.iter().any(|k| k.eq_ignore_ascii_case(kind)))
}

/// A pattern match with its adjusted confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedMatch {
    pub event: PatternMatchEvent,
    pub entity_kind: Option<String>,
    pub base_confidence: f64,
    pub confidence: f64,
    pub pos_boosted: bool,
    pub chunk_boosted: bool,
    pub sentence: String,
}

impl EnrichedMatch {
    /// Label carried by the match, if it names something.
    pub fn label(&self) -> Option<&str> {
        let e = &self.event;
        e.capture("label")
            .or_else(|| e.capture("name"))
            .or_else(|| e.capture("target"))
    }
}

pub struct NlpEnricher {
    config: EnrichmentConfig,
    analyzer: Arc<dyn LinguisticAnalyzer>,
}

impl std::fmt::Debug for NlpEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NlpEnricher").field("config", &self.config).finish()
    }
}

impl NlpEnricher {
    pub fn new(config: EnrichmentConfig, analyzer: Arc<dyn LinguisticAnalyzer>) -> Self {
        Self { config, analyzer }
    }

    pub fn base_confidence(&self, kind: PatternKind) -> f64 {
        match kind {
            PatternKind::Entity | PatternKind::Triple => self.config.explicit_confidence,
            PatternKind::Wikilink | PatternKind::Backlink => self.config.link_confidence,
            PatternKind::Tag | PatternKind::Mention => self.config.tag_confidence,
            PatternKind::Temporal => self.config.temporal_confidence,
            PatternKind::Custom => self.config.default_confidence,
        }
    }

    /// Enrich a single match. Analyzes `full_text`; prefer `enrich_all` for batches.
    pub fn enrich_match(&self, event: &PatternMatchEvent, full_text: &str) -> EnrichedMatch {
        if event.kind.is_explicit() {
            return self.explicit(event, full_text);
        }
        let analysis = self.analyzer.analyze(full_text);
        self.enrich_with(event, full_text, &analysis)
    }

    /// Enrich a batch against one analysis of the document.
    pub fn enrich_all(&self, events: &[PatternMatchEvent], full_text: &str) -> Vec<EnrichedMatch> {
        let needs_analysis = events.iter().any(|e| !e.kind.is_explicit());
        let analysis = if needs_analysis {
            self.analyzer.analyze(full_text)
        } else {
            Analysis::default()
        };

        events
            .iter()
            .map(|event| {
                if event.kind.is_explicit() {
                    self.explicit(event, full_text)
                } else {
                    self.enrich_with(event, full_text, &analysis)
                }
            })
            .collect()
    }

    fn explicit(&self, event: &PatternMatchEvent, full_text: &str) -> EnrichedMatch {
        let base = self.base_confidence(event.kind);
        EnrichedMatch {
            event: event.clone(),
            entity_kind: Self::entity_kind(event),
            base_confidence: base,
            confidence: base,
            pos_boosted: false,
            chunk_boosted: false,
            sentence: sentence_around(full_text, event.position, event.end()).to_string(),
        }
    }

    fn entity_kind(event: &PatternMatchEvent) -> Option<String> {
        match event.kind {
            PatternKind::Entity => event.capture("entity_kind").map(str::to_string),
            PatternKind::Mention => Some("CHARACTER".to_string()),
            _ => None,
        }
    }

    fn enrich_with(&self, event: &PatternMatchEvent, full_text: &str, analysis: &Analysis) -> EnrichedMatch {
        let base = self.base_confidence(event.kind);
        let entity_kind = Self::entity_kind(event);
        let (start, end) = (event.position, event.end());

        let mut pos_boosted = false;
        let mut chunk_boosted = false;

        if let Some(sentence) = analysis.sentence_at(start) {
            if let (Some(first), Some(last)) =
                (sentence.token_index_at(start, end), sentence.last_token_index_at(start, end))
            {
                let tokens = &sentence.tokens;

                if let Some(window) = entity_kind.as_deref().and_then(pos_window) {
                    let before = first.checked_sub(1).map(|i| tokens[i].pos);
                    let after = tokens.get(last + 1).map(|t| t.pos);
                    pos_boosted = before.map(|p| window.before.contains(&p)).unwrap_or(false)
                        || after.map(|p| window.after.contains(&p)).unwrap_or(false);
                }

                let mut words = tokens[first..=last]
                    .iter()
                    .filter(|t| t.pos != PosTag::Punctuation)
                    .peekable();
                chunk_boosted = words.peek().is_some() && words.all(|t| t.pos == PosTag::ProperNoun);
            }
        }

        let mut confidence = base;
        if pos_boosted {
            confidence *= self.config.pos_boost;
        }
        if chunk_boosted {
            confidence *= self.config.chunk_boost;
        }

        EnrichedMatch {
            event: event.clone(),
            entity_kind,
            base_confidence: base,
            confidence: confidence.clamp(0.0, 1.0),
            pos_boosted,
            chunk_boosted,
            sentence: sentence_around(full_text, start, end).to_string(),
        }
    }
}

// =============================================================================
// Disambiguation
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub entity_id: String,
    pub label: String,
    pub kind: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct Disambiguator {
    threshold: f64,
    context_window: usize,
}

impl Disambiguator {
    pub fn new(config: &EnrichmentConfig) -> Self {
        Self {
            threshold: config.disambiguation_threshold,
            context_window: config.context_window,
        }
    }

    fn words(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Text within `context_window` bytes of `start..end`, widened to char boundaries.
    fn context<'t>(&self, text: &'t str, start: usize, end: usize) -> &'t str {
        let mut from = start.min(text.len()).saturating_sub(self.context_window);
        while !text.is_char_boundary(from) {
            from -= 1;
        }
        let mut to = end.saturating_add(self.context_window).min(text.len());
        while !text.is_char_boundary(to) {
            to += 1;
        }
        &text[from..to]
    }

    /// Similarity between a surface string and a known name.
    fn name_score(surface: &[String], name: &[String]) -> f64 {
        if surface.is_empty() || name.is_empty() {
            return 0.0;
        }
        if surface == name {
            return 1.0;
        }
        let name_set: HashSet<&String> = name.iter().collect();
        let surface_set: HashSet<&String> = surface.iter().collect();
        if surface_set.is_subset(&name_set) {
            return 0.6 + 0.1 * (surface_set.len() as f64 / name_set.len() as f64);
        }
        let shared = surface_set.intersection(&name_set).count() as f64;
        let union = surface_set.union(&name_set).count() as f64;
        0.6 * shared / union
    }

    /// Resolve `surface` (found at `start..end` of `text`) to a known entity.
    /// Ties between different entities are treated as unresolved.
    pub fn resolve(
        &self,
        surface: &str,
        kind: Option<&str>,
        text: &str,
        start: usize,
        end: usize,
        cache: &ScanCycleCache,
    ) -> Option<Resolution> {
        let surface_words = Self::words(surface);
        if surface_words.is_empty() {
            return None;
        }
        let context = self.context(text, start, end).to_lowercase();

        let mut best: Option<Resolution> = None;
        let mut tied = false;

        for entity in cache.entities() {
            if let Some(kind) = kind {
                if !entity.kind.eq_ignore_ascii_case(kind) {
                    continue;
                }
            }

            let mut score = std::iter::once(&entity.label)
                .chain(entity.aliases.iter())
                .map(|name| Self::name_score(&surface_words, &Self::words(name)))
                .fold(0.0_f64, f64::max);
            if score <= 0.0 {
                continue;
            }

            let label_lower = entity.label.to_lowercase();
            if score < 1.0 && label_lower != surface.trim().to_lowercase() && context.contains(&label_lower) {
                score += 0.15;
            }
            let score = score.min(1.0);

            match &best {
                Some(b) if (score - b.confidence).abs() < f64::EPSILON => tied = true,
                Some(b) if score < b.confidence => {}
                _ => {
                    tied = false;
                    best = Some(Resolution {
                        entity_id: entity.id.clone(),
                        label: entity.label.clone(),
                        kind: entity.kind.clone(),
                        confidence: score,
                    });
                }
            }
        }

        if tied {
            return None;
        }
        best.filter(|r| r.confidence > self.threshold)
    }
}
