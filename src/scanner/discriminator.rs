//! Discriminator automaton
//!
//! Locates syntax openers (`[[`, `[`, `<<`, `#`, `@`) in a single pass with
//! Aho-Corasick. Every hit lists the patterns that may begin at that position,
//! so the extractor only runs a pattern's regex where it can possibly match.

use std::collections::BTreeMap;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Deserialize, Serialize};

use crate::scanner::error::ScanError;

// =============================================================================
// Types
// =============================================================================

/// One discriminator occurrence. At most one hit exists per position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscriminatorHit {
    pub discriminator: String,
    pub position: usize,
    /// Patterns whose opener is a prefix of `discriminator`
    pub pattern_ids: Vec<String>,
}

// =============================================================================
// DiscriminatorAutomaton
// =============================================================================

/// Multi-pattern opener search over a small, fixed alphabet.
#[derive(Debug, Clone, Default)]
pub struct DiscriminatorAutomaton {
    /// token -> ids of patterns that declared exactly this token
    registry: BTreeMap<String, Vec<String>>,
    /// Tokens in automaton order (longest first)
    tokens: Vec<String>,
    /// Per token: every pattern whose opener is a prefix of the token
    token_patterns: Vec<Vec<String>>,
    automaton: Option<AhoCorasick>,
}

impl DiscriminatorAutomaton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(discriminator, pattern_id)` pairs in one step.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut automaton = Self::new();
        for (token, pattern_id) in pairs {
            automaton.register(token, pattern_id);
        }
        automaton.build()?;
        Ok(automaton)
    }

    /// Register a pattern under its opener. Call `build()` afterwards.
    pub fn register(&mut self, discriminator: &str, pattern_id: &str) {
        if discriminator.is_empty() {
            return;
        }
        let ids = self.registry.entry(discriminator.to_string()).or_default();
        if !ids.iter().any(|id| id == pattern_id) {
            ids.push(pattern_id.to_string());
        }
    }

    pub fn build(&mut self) -> Result<(), ScanError> {
        let mut tokens: Vec<String> = self.registry.keys().cloned().collect();
        // Longest first so `[[` is tried before `[`
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        self.token_patterns = tokens
            .iter()
            .map(|token| {
                self.registry
                    .iter()
                    .filter(|(opener, _)| token.starts_with(opener.as_str()))
                    .flat_map(|(_, ids)| ids.iter().cloned())
                    .collect()
            })
            .collect();

        if tokens.is_empty() {
            self.automaton = None;
            self.tokens = tokens;
            return Ok(());
        }

        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&tokens)
            .map_err(|e| ScanError::AutomatonBuild(e.to_string()))?;

        self.tokens = tokens;
        self.automaton = Some(automaton);
        Ok(())
    }

    /// Every opener position in `text`, sorted, longest token per position.
    pub fn find_all(&self, text: &str) -> Vec<DiscriminatorHit> {
        let automaton = match &self.automaton {
            Some(ac) => ac,
            None => return Vec::new(),
        };

        let mut raw: Vec<(usize, usize)> = automaton
            .find_overlapping_iter(text)
            .map(|m| (m.start(), m.pattern().as_usize()))
            .collect();

        raw.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| self.tokens[b.1].len().cmp(&self.tokens[a.1].len()))
        });
        raw.dedup_by_key(|(position, _)| *position);

        raw.into_iter()
            .map(|(position, index)| DiscriminatorHit {
                discriminator: self.tokens[index].clone(),
                position,
                pattern_ids: self.token_patterns[index].clone(),
            })
            .collect()
    }

    /// True when any registered opener occurs in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.automaton.as_ref().map(|ac| ac.is_match(text)).unwrap_or(false)
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_built(&self) -> bool {
        self.automaton.is_some()
    }
}

// =============================================================================
// Tests
// =============================================================================
