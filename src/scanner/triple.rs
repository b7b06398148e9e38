//! TripleCortex: Triple Syntax Extraction
//!
//! Turns triple match events (`[K|S] ->P-> [K|O]` and `[K|S->P->O]`) into
//! `ExtractedTriple`s with their surrounding sentence as context.

use serde::{Deserialize, Serialize};

use crate::scanner::cache::ScanCycleCache;
use crate::scanner::syntax::{PatternKind, PatternMatchEvent};

/// Kind given to an inline-triple object whose kind is not written out
pub const UNKNOWN_KIND: &str = "UNKNOWN";

// =============================================================================
// Types
// =============================================================================

/// One end of a triple
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TripleEntity {
    pub kind: String,
    pub label: String,
    pub id: Option<String>,
}

/// An extracted triple relationship
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedTriple {
    pub subject: TripleEntity,
    pub predicate: String,
    pub object: TripleEntity,
    /// Sentence containing the triple
    pub context: String,
    pub confidence: f64,
    pub position: usize,
}

// =============================================================================
// TripleCortex
// =============================================================================

/// Triple event converter
#[derive(Debug, Clone)]
pub struct TripleCortex {
    confidence: f64,
}

impl Default for TripleCortex {
    fn default() -> Self {
        Self::new(0.95)
    }
}

impl TripleCortex {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Convert every triple event; other kinds are ignored.
    pub fn extract(&self, events: &[PatternMatchEvent], text: &str) -> Vec<ExtractedTriple> {
        events
            .iter()
            .filter(|e| e.kind == PatternKind::Triple)
            .filter_map(|e| self.from_event(e, text))
            .collect()
    }

    fn from_event(&self, event: &PatternMatchEvent, text: &str) -> Option<ExtractedTriple> {
        let subject_label = event.capture("subject_label")?;
        let predicate = event.capture("predicate")?;
        let object_label = event.capture("object_label")?;

        // Validate non-empty components
        if subject_label.is_empty() || predicate.is_empty() || object_label.is_empty() {
            return None;
        }

        Some(ExtractedTriple {
            subject: TripleEntity {
                kind: event.capture("subject_kind").unwrap_or(UNKNOWN_KIND).to_string(),
                label: subject_label.to_string(),
                id: None,
            },
            predicate: predicate.to_uppercase(),
            object: TripleEntity {
                kind: event.capture("object_kind").unwrap_or(UNKNOWN_KIND).to_string(),
                label: object_label.to_string(),
                id: None,
            },
            context: sentence_around(text, event.position, event.end()).to_string(),
            confidence: self.confidence,
            position: event.position,
        })
    }

    /// Fill in ids (and unknown kinds) from the cycle's entity snapshot.
    pub fn resolve(&self, triples: &mut [ExtractedTriple], cache: &ScanCycleCache) {
        for triple in triples {
            for end in [&mut triple.subject, &mut triple.object] {
                if let Some(entity) = cache.find(&end.label) {
                    end.id = Some(entity.id.clone());
                    if end.kind == UNKNOWN_KIND {
                        end.kind = entity.kind.clone();
                    }
                }
            }
        }
    }
}

/// Slice of `text` between the sentence terminators surrounding `start..end`.
pub fn sentence_around(text: &str, start: usize, end: usize) -> &str {
    let is_terminator = |c: char| matches!(c, '.' | '!' | '?' | '\n');
    let start = floor_char_boundary(text, start);
    let end = floor_char_boundary(text, end.max(start));

    let from = text[..start]
        .char_indices()
        .rev()
        .find(|(_, c)| is_terminator(*c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let to = text[end..]
        .char_indices()
        .find(|(_, c)| is_terminator(*c))
        .map(|(i, c)| end + i + c.len_utf8())
        .unwrap_or(text.len());

    text[from..to].trim()
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// =============================================================================
// Tests
// =============================================================================
