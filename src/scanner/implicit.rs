//! ImplicitCortex: Entity name matching via Aho-Corasick
//!
//! Finds known entity labels and aliases in plain prose. Labels and text are
//! both run through a byte-length-preserving normalization (ASCII lowercase
//! plus a leet table), so obfuscated spellings like "Fr0d0" hit the same
//! automaton state as "Frodo" and keep their original offsets.

use std::collections::HashSet;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scanner::cache::ScanCycleCache;
use crate::scanner::config::ImplicitConfig;
use crate::scanner::error::ScanError;
use crate::scanner::registry::EntityDefinition;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Alias,
    Leet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.9 {
            ConfidenceTier::High
        } else if confidence >= 0.7 {
            ConfidenceTier::Medium
        } else {
            ConfidenceTier::Low
        }
    }
}

/// A detected implicit entity mention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicitMatch {
    pub entity_id: String,
    pub entity_label: String,
    pub entity_kind: String,
    pub position: usize,
    pub length: usize,
    pub matched_text: String,
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub match_type: MatchType,
}

impl ImplicitMatch {
    pub fn end(&self) -> usize {
        self.position + self.length
    }
}

/// One indexed label or alias
#[derive(Debug, Clone)]
struct PatternMeta {
    entity_id: String,
    entity_label: String,
    entity_kind: String,
    /// Lowercase surface form
    surface: String,
    /// Leet-normalized form fed to the automaton
    normalized: String,
    is_alias: bool,
    confidence: f64,
}

// =============================================================================
// Normalization
// =============================================================================

fn leet_char(c: char) -> char {
    match c {
        '0' => 'o',
        '1' => 'i',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '7' => 't',
        '@' => 'a',
        '$' => 's',
        '#' => 'h',
        c if c.is_ascii() => c.to_ascii_lowercase(),
        c => {
            // Only lowercase when it keeps the UTF-8 width
            let mut lower = c.to_lowercase();
            match (lower.next(), lower.next()) {
                (Some(l), None) if l.len_utf8() == c.len_utf8() => l,
                _ => c,
            }
        }
    }
}

/// Lowercase + leet substitution. Output has the same byte length as input.
pub fn leet_normalize(text: &str) -> String {
    text.chars().map(leet_char).collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// True when `start..end` is delimited by non-word characters (or text edges).
fn on_word_boundary(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    !before.map(is_word_char).unwrap_or(false) && !after.map(is_word_char).unwrap_or(false)
}

// =============================================================================
// Smart Alias Generation
// =============================================================================

/// Generate aliases from an entity name based on its kind.
/// Returns (alias, confidence) pairs.
fn generate_aliases(label: &str, kind: &str, min_len: usize) -> Vec<(String, f64)> {
    let parts: Vec<&str> = label.split_whitespace().collect();
    let mut aliases: Vec<(String, f64)> = Vec::new();
    if parts.len() <= 1 {
        return aliases;
    }
    let long_enough = |s: &str| s.chars().count() >= min_len;
    let last = parts[parts.len() - 1];

    match kind.to_uppercase().as_str() {
        "CHARACTER" | "PERSON" => {
            let (last_conf, pair_conf) = if parts.len() <= 3 { (0.90, 0.85) } else { (0.85, 0.80) };
            if long_enough(last) && !is_title_or_honorific(last) {
                aliases.push((last.to_string(), last_conf));
            }
            if parts.len() >= 3 {
                let pair = format!("{} {}", parts[parts.len() - 2], last);
                aliases.push((pair, pair_conf));
            }
        }
        "FACTION" | "ORGANIZATION" | "GROUP" => {
            if long_enough(last) && !is_common_word(last) {
                aliases.push((last.to_string(), 0.75));
            }
            if parts.len() >= 3 {
                let acronym: String = parts
                    .iter()
                    .filter(|p| !is_common_word(p))
                    .filter_map(|p| p.chars().next())
                    .collect::<String>()
                    .to_uppercase();
                if long_enough(&acronym) {
                    aliases.push((acronym, 0.70));
                }
            }
        }
        _ => {
            if long_enough(last) && !is_common_word(last) {
                aliases.push((last.to_string(), 0.80));
            }
        }
    }
    aliases
}

fn is_title_or_honorific(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "mr" | "mrs" | "ms" | "dr" | "prof" | "sir" | "lord" | "lady"
            | "king" | "queen" | "prince" | "princess" | "captain" | "general"
            | "the" | "of" | "and" | "jr" | "sr" | "ii" | "iii" | "iv"
    )
}

fn is_common_word(word: &str) -> bool {
    matches!(
        word.to_lowercase().as_str(),
        "the" | "of" | "and" | "or" | "a" | "an" | "in" | "on" | "at" | "to" | "for"
            | "is" | "are" | "was" | "were" | "be" | "been" | "being"
    )
}

// =============================================================================
// Bracket post-filter
// =============================================================================

fn is_kind_token(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// True when `position` sits inside `[KIND|...]` or `[KIND:SUBTYPE|...]`.
pub fn inside_explicit_syntax(text: &str, position: usize) -> bool {
    let open = match text[..position].rfind(['[', ']']) {
        Some(i) if text.as_bytes()[i] == b'[' => i,
        _ => return false,
    };
    let close = match text[position..].find(['[', ']']) {
        Some(i) if text.as_bytes()[position + i] == b']' => position + i,
        _ => return false,
    };
    let inner = &text[open + 1..close];
    let head = match inner.split_once('|') {
        Some((head, _)) => head,
        None => return false,
    };
    match head.split_once(':') {
        Some((kind, subtype)) => is_kind_token(kind) && is_kind_token(subtype),
        None => is_kind_token(head),
    }
}

// =============================================================================
// ImplicitCortex
// =============================================================================

/// Entity name matcher
#[derive(Debug, Clone)]
pub struct ImplicitCortex {
    config: ImplicitConfig,
    patterns: Vec<PatternMeta>,
    automaton: Option<AhoCorasick>,
}

impl Default for ImplicitCortex {
    fn default() -> Self {
        Self::new(ImplicitConfig::default())
    }
}

impl ImplicitCortex {
    pub fn new(config: ImplicitConfig) -> Self {
        Self {
            config,
            patterns: Vec::new(),
            automaton: None,
        }
    }

    /// Build a matcher over a cycle snapshot.
    pub fn from_cache(cache: &ScanCycleCache, config: ImplicitConfig) -> Self {
        let mut cortex = Self::new(config);
        cortex.hydrate(cache.entities());
        cortex
    }

    /// Replace all indexed entities and rebuild the automaton.
    ///
    /// A failed automaton build is logged and leaves the naive path in charge.
    pub fn hydrate(&mut self, entities: &[EntityDefinition]) {
        self.patterns.clear();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for entity in entities {
            self.push_pattern(entity, &entity.label, false, 1.0, &mut seen);
            for alias in &entity.aliases {
                self.push_pattern(entity, alias, true, self.config.alias_confidence, &mut seen);
            }
            if self.config.smart_aliases {
                for (alias, confidence) in generate_aliases(&entity.label, &entity.kind, self.config.min_label_len) {
                    self.push_pattern(entity, &alias, true, confidence, &mut seen);
                }
            }
        }

        self.automaton = None;
        if self.config.use_automaton && !self.patterns.is_empty() {
            match self.build_automaton() {
                Ok(ac) => self.automaton = Some(ac),
                Err(e) => warn!(error = %e, "implicit automaton unavailable, using naive matcher"),
            }
        }
    }

    fn push_pattern(
        &mut self,
        entity: &EntityDefinition,
        text: &str,
        is_alias: bool,
        confidence: f64,
        seen: &mut HashSet<(String, String)>,
    ) {
        let text = text.trim();
        if text.chars().count() < self.config.min_label_len {
            return;
        }
        let normalized = leet_normalize(text);
        if !seen.insert((entity.id.clone(), normalized.clone())) {
            return;
        }
        self.patterns.push(PatternMeta {
            entity_id: entity.id.clone(),
            entity_label: entity.label.clone(),
            entity_kind: entity.kind.clone(),
            surface: text.to_lowercase(),
            normalized,
            is_alias,
            confidence: confidence.clamp(0.0, 1.0),
        });
    }

    fn build_automaton(&self) -> Result<AhoCorasick, ScanError> {
        AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(self.patterns.iter().map(|p| p.normalized.as_str()))
            .map_err(|e| ScanError::AutomatonBuild(e.to_string()))
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn has_automaton(&self) -> bool {
        self.automaton.is_some()
    }

    /// All non-overlapping mentions, sorted by position, outside bracket syntax.
    pub fn find_mentions(&self, text: &str) -> Vec<ImplicitMatch> {
        if text.is_empty() || self.patterns.is_empty() {
            return Vec::new();
        }
        let normalized = leet_normalize(text);
        let matches = match &self.automaton {
            Some(ac) => self.find_with_automaton(ac, text, &normalized),
            None => self.find_naive(text, &normalized),
        };
        matches
            .into_iter()
            .filter(|m| !inside_explicit_syntax(text, m.position))
            .collect()
    }

    fn find_with_automaton(&self, ac: &AhoCorasick, text: &str, normalized: &str) -> Vec<ImplicitMatch> {
        let mut candidates: Vec<(usize, usize, usize)> = ac
            .find_overlapping_iter(normalized)
            .filter(|m| on_word_boundary(text, m.start(), m.end()))
            .map(|m| (m.start(), m.end(), m.pattern().as_usize()))
            .collect();

        // Start asc, longer first, then pattern order (labels before aliases)
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0)))
                .then_with(|| a.2.cmp(&b.2))
        });

        let mut result = Vec::new();
        let mut last_end = 0;
        for (start, end, index) in candidates {
            if start >= last_end {
                last_end = end;
                result.push(self.classify(&self.patterns[index], text, start, end));
            }
        }
        result
    }

    /// Longest patterns first; claimed bytes cannot be reused by shorter ones.
    fn find_naive(&self, text: &str, normalized: &str) -> Vec<ImplicitMatch> {
        let mut order: Vec<usize> = (0..self.patterns.len()).collect();
        order.sort_by(|&a, &b| {
            self.patterns[b]
                .normalized
                .len()
                .cmp(&self.patterns[a].normalized.len())
                .then_with(|| a.cmp(&b))
        });

        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut result = Vec::new();
        for index in order {
            let needle = &self.patterns[index].normalized;
            for (start, _) in normalized.match_indices(needle.as_str()) {
                let end = start + needle.len();
                if !on_word_boundary(text, start, end) {
                    continue;
                }
                if claimed.iter().any(|&(s, e)| start < e && s < end) {
                    continue;
                }
                claimed.push((start, end));
                result.push(self.classify(&self.patterns[index], text, start, end));
            }
        }
        result.sort_by_key(|m| m.position);
        result
    }

    fn classify(&self, meta: &PatternMeta, text: &str, start: usize, end: usize) -> ImplicitMatch {
        let raw = &text[start..end];
        let (match_type, confidence) = if raw.to_lowercase() == meta.surface {
            let kind = if meta.is_alias { MatchType::Alias } else { MatchType::Exact };
            (kind, meta.confidence)
        } else {
            (MatchType::Leet, self.config.leet_confidence.min(meta.confidence))
        };

        ImplicitMatch {
            entity_id: meta.entity_id.clone(),
            entity_label: meta.entity_label.clone(),
            entity_kind: meta.entity_kind.clone(),
            position: start,
            length: end - start,
            matched_text: raw.to_string(),
            confidence,
            tier: ConfidenceTier::from_confidence(confidence),
            match_type,
        }
    }

    pub fn clear(&mut self) {
        self.patterns.clear();
        self.automaton = None;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, label: &str, kind: &str, aliases: Vec<&str>) -> EntityDefinition {
        EntityDefinition {
            id: id.to_string(),
            label: label.to_string(),
            kind: kind.to_string(),
            aliases: aliases.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    fn cortex(entities: Vec<EntityDefinition>) -> ImplicitCortex {
        let mut cortex = ImplicitCortex::default();
        cortex.hydrate(&entities);
        cortex
    }

    fn naive_cortex(entities: Vec<EntityDefinition>) -> ImplicitCortex {
        let mut cortex = ImplicitCortex::new(ImplicitConfig {
            use_automaton: false,
            ..ImplicitConfig::default()
        });
        cortex.hydrate(&entities);
        cortex
    }

    // -------------------------------------------------------------------------
    // Requirement 1: Exact label match
    // -------------------------------------------------------------------------
    #[test]
    fn test_exact_match() {
        let c = cortex(vec![entity("char_001", "Frodo", "CHARACTER", vec![])]);
        let m = c.find_mentions("Frodo went to the market");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].entity_id, "char_001");
        assert_eq!(m[0].position, 0);
        assert_eq!(m[0].length, 5);
        assert_eq!(m[0].match_type, MatchType::Exact);
        assert_eq!(m[0].tier, ConfidenceTier::High);
    }

    // -------------------------------------------------------------------------
    // Requirement 2: Leet-speak mention
    // -------------------------------------------------------------------------
    #[test]
    fn test_leet_match() {
        let c = cortex(vec![entity("e1", "Frodo", "CHARACTER", vec![])]);
        let text = "Fr0d0 walked to Mordor.";
        let m = c.find_mentions(text);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].match_type, MatchType::Leet);
        assert_eq!(m[0].position, 0);
        assert_eq!(m[0].length, 5);
        assert_eq!(m[0].matched_text, "Fr0d0");
        assert_eq!(m[0].tier, ConfidenceTier::Low);
        assert!(m[0].confidence < 1.0);
    }

    #[test]
    fn test_leet_normalize_preserves_length() {
        for s in ["Fr0d0", "$@ur0n", "Éowyn", "İstanbul", "#0b817"] {
            assert_eq!(leet_normalize(s).len(), s.len());
        }
        assert_eq!(leet_normalize("G4nd4lf"), "gandalf");
    }

    // -------------------------------------------------------------------------
    // Requirement 3: Aliases and smart aliases
    // -------------------------------------------------------------------------
    #[test]
    fn test_alias_match() {
        let c = cortex(vec![entity("e1", "Aragorn", "CHARACTER", vec!["Strider"])]);
        let m = c.find_mentions("Strider watched the road");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].match_type, MatchType::Alias);
        assert_eq!(m[0].entity_label, "Aragorn");
        assert!((m[0].confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_smart_surname_alias() {
        let c = cortex(vec![entity("e1", "Samwell Tarly", "CHARACTER", vec![])]);
        let m = c.find_mentions("Tarly read by candlelight");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].match_type, MatchType::Alias);
        assert_eq!(m[0].tier, ConfidenceTier::High);
    }

    #[test]
    fn test_generate_aliases_by_kind() {
        let a = generate_aliases("Order of the Phoenix", "FACTION", 3);
        assert!(a.iter().any(|(s, _)| s == "Phoenix"));
        // "OP" is shorter than the minimum alias length
        assert!(!a.iter().any(|(s, _)| s == "OP"));

        let a = generate_aliases("Night's Watch Brotherhood", "FACTION", 2);
        assert!(a.iter().any(|(s, _)| s == "NWB"));

        let a = generate_aliases("Lord Sir", "CHARACTER", 3);
        assert!(a.is_empty(), "titles never become aliases");
        assert!(generate_aliases("Frodo", "CHARACTER", 3).is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 4: Labels shorter than 3 chars are not indexed
    // -------------------------------------------------------------------------
    #[test]
    fn test_short_labels_skipped() {
        let c = cortex(vec![entity("e1", "Al", "CHARACTER", vec!["Bo"])]);
        assert_eq!(c.pattern_count(), 0);
        assert!(c.find_mentions("Al and Bo").is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 5: Word boundaries and longest match
    // -------------------------------------------------------------------------
    #[test]
    fn test_word_boundaries() {
        let c = cortex(vec![entity("e1", "Sam", "CHARACTER", vec![])]);
        assert!(c.find_mentions("Samwise and samples").is_empty());
        assert_eq!(c.find_mentions("(Sam), sam!").len(), 2);
    }

    #[test]
    fn test_longest_wins() {
        let entities = vec![
            entity("e1", "Jon", "CHARACTER", vec![]),
            entity("e2", "Jon Snow", "CHARACTER", vec![]),
        ];
        for c in [cortex(entities.clone()), naive_cortex(entities.clone())] {
            let m = c.find_mentions("Jon Snow met Jon.");
            assert_eq!(m.len(), 2);
            assert_eq!(m[0].entity_id, "e2");
            assert_eq!(m[1].entity_id, "e1");
            assert_eq!(m[1].position, 13);
        }

        // A failed boundary on the long form does not hide the short one
        let m = cortex(entities).find_mentions("Jon Snowfall");
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].entity_id, "e1");
    }

    // -------------------------------------------------------------------------
    // Requirement 6: Naive path agrees with the automaton
    // -------------------------------------------------------------------------
    #[test]
    fn test_naive_fallback() {
        let entities = vec![
            entity("e1", "Frodo", "CHARACTER", vec![]),
            entity("e2", "Mordor", "LOCATION", vec!["Black Land"]),
        ];
        let text = "Fr0d0 walked to the black land of MORDOR.";
        let a = cortex(entities.clone()).find_mentions(text);
        let n = naive_cortex(entities).find_mentions(text);
        assert!(!naive_cortex(vec![]).has_automaton());
        assert_eq!(a, n);
        assert_eq!(a.len(), 3);
    }

    // -------------------------------------------------------------------------
    // Requirement 7: Mentions inside explicit syntax are filtered
    // -------------------------------------------------------------------------
    #[test]
    fn test_bracket_filter() {
        let c = cortex(vec![entity("e1", "Frodo", "CHARACTER", vec![])]);
        assert!(c.find_mentions("[CHARACTER|Frodo] left").is_empty());
        assert!(c.find_mentions("[CHARACTER:HOBBIT|Frodo]").is_empty());
        assert_eq!(c.find_mentions("[[Frodo]] and [note Frodo]").len(), 2);
    }

    #[test]
    fn test_inside_explicit_syntax() {
        let text = "x [PLACE|Bree] y [lower|Bree] z";
        assert!(inside_explicit_syntax(text, 9));
        assert!(!inside_explicit_syntax(text, 23));
        assert!(!inside_explicit_syntax(text, 0));
        assert!(!inside_explicit_syntax("[PLACE|Bree", 7));
    }

    #[test]
    fn test_empty() {
        let c = cortex(vec![]);
        assert!(c.find_mentions("anything").is_empty());
        let c = cortex(vec![entity("e1", "Frodo", "CHARACTER", vec![])]);
        assert!(c.find_mentions("").is_empty());
    }
}
