//! RelationCortex: Relationship Extraction Module
//!
//! Infers relationships between entity mentions with four heuristic
//! strategies, each producing a confidence-scored edge:
//!
//! | Strategy      | Needs analyzer | Signal                                   |
//! |---------------|----------------|------------------------------------------|
//! | SVO           | yes            | verb lemma between two mentions          |
//! | PREP          | yes            | preposition between two mentions         |
//! | POSSESSION    | no             | `'s` / `'` right after a mention         |
//! | VERB_PATTERN  | no             | phrase dictionary over the raw gap text  |
//!
//! When no verb pattern fires between two neighbouring spans, their distance
//! alone yields a weak CO_OCCURRENCE edge.
//!
//! # Usage
//!
//! ```rust,ignore
//! let cortex = RelationCortex::new(RelationConfig::default())?;
//! let analysis = RuleAnalyzer::new().analyze(text);
//! let relationships = cortex.extract(text, &entity_spans, &analysis);
//! ```

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scanner::analyzer::{AnalyzedSentence, AnalyzedToken, Analysis, PosTag};
use crate::scanner::config::RelationConfig;
use crate::scanner::error::ScanError;
use crate::scanner::triple::sentence_around;

/// Predicate for possessive constructions
pub const POSSESSES: &str = "POSSESSES";
/// Predicate for proximity-only edges
pub const CO_OCCURS_WITH: &str = "CO_OCCURS_WITH";

// =============================================================================
// Types
// =============================================================================

/// Entity span input for relation extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    /// The entity label/name
    pub label: String,
    /// Entity ID (if known)
    pub entity_id: Option<String>,
    /// Start position in text
    pub start: usize,
    /// End position in text
    pub end: usize,
    /// Entity kind (CHARACTER, LOCATION, etc.)
    pub kind: Option<String>,
}

impl EntitySpan {
    pub fn new(label: &str, start: usize, end: usize) -> Self {
        Self {
            label: label.to_string(),
            entity_id: None,
            start,
            end,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }

    /// Identity used for pairing and deduplication.
    fn key(&self) -> String {
        self.entity_id
            .clone()
            .unwrap_or_else(|| self.label.to_lowercase())
    }
}

/// Spans must be non-empty and start and end on char boundaries of `text`.
pub(crate) fn span_in_bounds(text: &str, span: &EntitySpan) -> bool {
    let valid = span.start < span.end
        && span.end <= text.len()
        && text.is_char_boundary(span.start)
        && text.is_char_boundary(span.end);
    if !valid {
        warn!(label = %span.label, start = span.start, end = span.end, "dropping span outside text bounds");
    }
    valid
}

/// Which strategy produced a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationPattern {
    Svo,
    Prep,
    Possession,
    VerbPattern,
    CoOccurrence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationEnd {
    pub entity_id: Option<String>,
    pub text: String,
    pub position: usize,
}

impl RelationEnd {
    fn from_span(span: &EntitySpan) -> Self {
        Self {
            entity_id: span.entity_id.clone(),
            text: span.label.clone(),
            position: span.start,
        }
    }

    fn key(&self) -> String {
        self.entity_id
            .clone()
            .unwrap_or_else(|| self.text.to_lowercase())
    }
}

/// An inferred relationship between two mentions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub source: RelationEnd,
    pub target: RelationEnd,
    pub predicate: String,
    pub pattern: RelationPattern,
    pub confidence: f64,
    /// Sentence containing the source mention
    pub context: String,
    pub metadata: HashMap<String, String>,
}

/// Statistics from relation extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationStats {
    pub rules_checked: usize,
    pub pairs_scanned: usize,
    pub relationships_found: usize,
    pub scan_time_ms: f64,
}

// =============================================================================
// Rules
// =============================================================================

/// Trigger word → relationship type, with optional kind constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRule {
    /// Verb lemma or preposition, lowercase
    pub trigger: String,
    pub relation_type: String,
    pub confidence: f64,
    #[serde(default)]
    pub symmetric: bool,
    #[serde(default)]
    pub source_kinds: Option<Vec<String>>,
    #[serde(default)]
    pub target_kinds: Option<Vec<String>>,
}

impl RelationRule {
    pub fn new(trigger: &str, relation_type: &str, confidence: f64) -> Self {
        Self {
            trigger: trigger.to_lowercase(),
            relation_type: relation_type.to_string(),
            confidence,
            symmetric: false,
            source_kinds: None,
            target_kinds: None,
        }
    }

    pub fn symmetric(mut self) -> Self {
        self.symmetric = true;
        self
    }

    pub fn with_source_kinds(mut self, kinds: &[&str]) -> Self {
        self.source_kinds = Some(kinds.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn with_target_kinds(mut self, kinds: &[&str]) -> Self {
        self.target_kinds = Some(kinds.iter().map(|k| k.to_string()).collect());
        self
    }

    fn kind_allowed(allowed: &Option<Vec<String>>, kind: Option<&str>) -> bool {
        match (allowed, kind) {
            (None, _) => true,
            // Unknown kinds are not rejected
            (Some(_), None) => true,
            (Some(kinds), Some(k)) => kinds.iter().any(|a| a.eq_ignore_ascii_case(k)),
        }
    }

    pub fn accepts(&self, source_kind: Option<&str>, target_kind: Option<&str>) -> bool {
        Self::kind_allowed(&self.source_kinds, source_kind) && Self::kind_allowed(&self.target_kinds, target_kind)
    }

    fn targets(&self, target_kind: Option<&str>) -> bool {
        match (&self.target_kinds, target_kind) {
            (Some(kinds), Some(k)) => kinds.iter().any(|a| a.eq_ignore_ascii_case(k)),
            _ => false,
        }
    }
}

/// A phrase list for the span-based verb-pattern strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerbPatternRule {
    pub relation_type: String,
    pub phrases: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub symmetric: bool,
}

/// Verb, preposition and phrase rule tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationRules {
    pub verbs: Vec<RelationRule>,
    pub prepositions: Vec<RelationRule>,
    pub verb_patterns: Vec<VerbPatternRule>,
}

impl RelationRules {
    /// Empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in narrative rule set
    pub fn defaults() -> Self {
        let mut rules = Self::new();
        rules.add_default_verbs();
        rules.add_default_prepositions();
        rules.add_default_verb_patterns();
        rules
    }

    pub fn add_verb_rule(&mut self, rule: RelationRule) {
        self.verbs.push(rule);
    }

    pub fn add_preposition_rule(&mut self, rule: RelationRule) {
        self.prepositions.push(rule);
    }

    pub fn add_verb_pattern(&mut self, relation_type: &str, phrases: &[&str], confidence: f64, symmetric: bool) {
        self.verb_patterns.push(VerbPatternRule {
            relation_type: relation_type.to_string(),
            phrases: phrases.iter().map(|p| p.to_lowercase()).collect(),
            confidence,
            symmetric,
        });
    }

    /// First verb rule for `lemma` whose kind constraints hold.
    pub fn verb_rule(&self, lemma: &str, source_kind: Option<&str>, target_kind: Option<&str>) -> Option<&RelationRule> {
        self.verbs
            .iter()
            .find(|r| r.trigger == lemma && r.accepts(source_kind, target_kind))
    }

    /// Rule whose target kind matches, else the first rule for the preposition.
    pub fn preposition_rule(&self, preposition: &str, target_kind: Option<&str>) -> Option<&RelationRule> {
        let mut candidates = self.prepositions.iter().filter(|r| r.trigger == preposition);
        let first = candidates.clone().next();
        candidates.find(|r| r.targets(target_kind)).or(first)
    }

    pub fn len(&self) -> usize {
        self.verbs.len() + self.prepositions.len() + self.verb_patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add_default_verbs(&mut self) {
        let symmetric: &[(&str, &str, f64)] = &[
            ("meet", "KNOWS", 0.70),
            ("know", "KNOWS", 0.70),
            ("recognize", "KNOWS", 0.65),
            ("befriend", "FRIEND_OF", 0.85),
            ("marry", "SPOUSE_OF", 0.90),
            ("fight", "FOUGHT", 0.85),
            ("hate", "ENEMY_OF", 0.85),
            ("accompany", "ALLIED_WITH", 0.75),
        ];
        for (lemma, relation, confidence) in symmetric {
            self.add_verb_rule(RelationRule::new(lemma, relation, *confidence).symmetric());
        }

        let directed: &[(&str, &str, f64)] = &[
            ("love", "LOVES", 0.90),
            ("kill", "KILLED", 0.95),
            ("defeat", "DEFEATED", 0.90),
            ("attack", "ATTACKED", 0.85),
            ("betray", "BETRAYED", 0.85),
            ("serve", "SERVES", 0.85),
            ("command", "COMMANDS", 0.90),
            ("lead", "COMMANDS", 0.85),
            ("follow", "FOLLOWS", 0.70),
            ("help", "HELPED", 0.75),
            ("save", "SAVED", 0.80),
            ("teach", "MENTORS", 0.85),
            ("train", "MENTORS", 0.80),
            ("own", "OWNS", 0.80),
            ("wield", "OWNS", 0.80),
            ("carry", "OWNS", 0.75),
            ("find", "FOUND", 0.70),
            ("lose", "LOST", 0.75),
            ("create", "CREATED", 0.85),
            ("forge", "CREATED", 0.85),
            ("write", "CREATED", 0.80),
        ];
        for (lemma, relation, confidence) in directed {
            self.add_verb_rule(RelationRule::new(lemma, relation, *confidence));
        }

        let places: &[(&str, &str, f64)] = &[
            ("visit", "VISITED", 0.80),
            ("travel", "TRAVELED_TO", 0.75),
            ("live", "LOCATED_IN", 0.75),
            ("rule", "RULES", 0.85),
        ];
        for (lemma, relation, confidence) in places {
            self.add_verb_rule(RelationRule::new(lemma, relation, *confidence).with_target_kinds(&["LOCATION", "PLACE"]));
        }
        self.add_verb_rule(RelationRule::new("rule", "RULES", 0.80).with_target_kinds(&["FACTION", "ORGANIZATION"]));
        self.add_verb_rule(RelationRule::new("found", "FOUNDED", 0.85).with_target_kinds(&["FACTION", "ORGANIZATION", "LOCATION"]));
        self.add_verb_rule(RelationRule::new("join", "MEMBER_OF", 0.85).with_target_kinds(&["FACTION", "ORGANIZATION", "GROUP"]));
    }

    fn add_default_prepositions(&mut self) {
        let location = &["LOCATION", "PLACE"];
        self.add_preposition_rule(RelationRule::new("in", "LOCATED_IN", 0.75).with_target_kinds(location));
        self.add_preposition_rule(RelationRule::new("at", "LOCATED_IN", 0.70).with_target_kinds(location));
        self.add_preposition_rule(
            RelationRule::new("of", "MEMBER_OF", 0.70).with_target_kinds(&["FACTION", "ORGANIZATION", "GROUP"]),
        );
        self.add_preposition_rule(RelationRule::new("of", "ORIGINATES_FROM", 0.65).with_target_kinds(location));
        self.add_preposition_rule(RelationRule::new("to", "TRAVELED_TO", 0.70).with_target_kinds(location));
        self.add_preposition_rule(RelationRule::new("into", "TRAVELED_TO", 0.65).with_target_kinds(location));
        self.add_preposition_rule(RelationRule::new("from", "ORIGINATES_FROM", 0.65).with_target_kinds(location));
        self.add_preposition_rule(RelationRule::new("with", "ALLIED_WITH", 0.60).symmetric());
    }

    fn add_default_verb_patterns(&mut self) {
        // Family
        self.add_verb_pattern("PARENT_OF", &[
            "father of", "mother of", "parent of", "sire of", "gave birth to",
        ], 0.95, false);
        self.add_verb_pattern("CHILD_OF", &[
            "son of", "daughter of", "child of", "offspring of", "heir to", "descendant of",
        ], 0.95, false);
        self.add_verb_pattern("SIBLING_OF", &[
            "brother of", "sister of", "sibling of", "twin of", "half-brother of", "half-sister of",
        ], 0.95, true);
        self.add_verb_pattern("SPOUSE_OF", &[
            "married to", "wife of", "husband of", "spouse of", "betrothed to", "engaged to", "wedded to",
        ], 0.95, true);
        self.add_verb_pattern("RELATED_TO", &[
            "related to", "kin to", "relative of", "cousin of", "uncle of", "aunt of",
            "nephew of", "niece of", "ancestor of",
        ], 0.85, true);

        // Hierarchy
        self.add_verb_pattern("COMMANDS", &[
            "commands", "leads", "rules over", "is captain of", "is leader of",
            "gives orders to", "governs", "presides over",
        ], 0.90, false);
        self.add_verb_pattern("SERVES", &[
            "serves", "obeys", "is subordinate to", "reports to", "works under",
            "is loyal to", "swore allegiance to", "pledged loyalty to",
        ], 0.90, false);
        self.add_verb_pattern("MEMBER_OF", &[
            "member of", "belongs to", "joined", "affiliated with", "enrolled in", "citizen of",
        ], 0.85, false);

        // Social
        self.add_verb_pattern("KNOWS", &[
            "knows", "met", "encountered", "is acquainted with", "recognizes",
            "familiar with", "introduced to",
        ], 0.70, true);
        self.add_verb_pattern("FRIEND_OF", &[
            "friend of", "befriended", "is friends with", "companion of",
            "ally of", "comrade of",
        ], 0.85, true);
        self.add_verb_pattern("RIVAL_OF", &[
            "rival of", "competes with", "nemesis of", "adversary of", "opponent of",
        ], 0.85, true);
        self.add_verb_pattern("ENEMY_OF", &[
            "enemy of", "hates", "despises", "loathes", "opposes", "at war with",
        ], 0.85, true);

        // Romance
        self.add_verb_pattern("LOVES", &[
            "loves", "is in love with", "adores", "fell in love with", "devoted to", "cherishes",
        ], 0.90, false);

        // Conflict
        self.add_verb_pattern("FOUGHT", &[
            "fought", "battled", "clashed with", "dueled", "skirmished with", "ambushed",
        ], 0.85, true);
        self.add_verb_pattern("DEFEATED", &[
            "defeated", "conquered", "overcame", "bested", "vanquished", "triumphed over",
        ], 0.90, false);
        self.add_verb_pattern("KILLED", &[
            "killed", "slew", "murdered", "assassinated", "executed", "slaughtered",
        ], 0.95, false);

        // Location
        self.add_verb_pattern("TRAVELED_TO", &[
            "traveled to", "travelled to", "went to", "journeyed to", "arrived at",
            "sailed to", "headed to", "departed for", "rode to",
        ], 0.80, false);
        self.add_verb_pattern("BORN_IN", &[
            "born in", "native of", "hails from",
        ], 0.90, false);

        // Possession
        self.add_verb_pattern("OWNS", &[
            "owns", "possesses", "holds", "wields", "carries", "is owner of", "bears",
        ], 0.80, false);
        self.add_verb_pattern("CREATED", &[
            "created", "forged", "built", "crafted", "invented", "wrote", "founded",
        ], 0.85, false);

        // Mentorship
        self.add_verb_pattern("MENTORED_BY", &[
            "trained by", "taught by", "learned from", "mentored by", "apprenticed to",
            "student of", "disciple of", "studied under",
        ], 0.90, false);
        self.add_verb_pattern("MENTORS", &[
            "trains", "teaches", "mentors", "instructs", "tutors",
        ], 0.90, false);
    }
}

// =============================================================================
// RelationCortex
// =============================================================================

#[derive(Debug, Clone)]
struct CompiledVerbPattern {
    relation_type: String,
    confidence: f64,
    symmetric: bool,
    regex: Regex,
}

fn compile_verb_pattern(rule: &VerbPatternRule) -> Result<CompiledVerbPattern, ScanError> {
    let mut phrases: Vec<&str> = rule.phrases.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect();
    // Longer alternatives first
    phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));
    let alternation = phrases.iter().map(|p| regex::escape(p)).collect::<Vec<_>>().join("|");
    let regex = Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).map_err(|e| ScanError::InvalidRegex {
        pattern_id: rule.relation_type.clone(),
        message: e.to_string(),
    })?;
    Ok(CompiledVerbPattern {
        relation_type: rule.relation_type.clone(),
        confidence: rule.confidence,
        symmetric: rule.symmetric,
        regex,
    })
}

/// Relationship extraction engine
#[derive(Debug, Clone)]
pub struct RelationCortex {
    config: RelationConfig,
    rules: RelationRules,
    verb_patterns: Vec<CompiledVerbPattern>,
}

impl RelationCortex {
    /// Cortex with the built-in rule tables
    pub fn new(config: RelationConfig) -> Result<Self, ScanError> {
        Self::with_rules(config, RelationRules::defaults())
    }

    pub fn with_rules(config: RelationConfig, rules: RelationRules) -> Result<Self, ScanError> {
        let verb_patterns = rules
            .verb_patterns
            .iter()
            .filter(|r| !r.phrases.is_empty())
            .map(compile_verb_pattern)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            rules,
            verb_patterns,
        })
    }

    pub fn rules(&self) -> &RelationRules {
        &self.rules
    }

    pub fn config(&self) -> &RelationConfig {
        &self.config
    }

    /// Run every strategy and merge duplicates.
    pub fn extract(&self, text: &str, spans: &[EntitySpan], analysis: &Analysis) -> Vec<ExtractedRelationship> {
        self.extract_with_stats(text, spans, analysis).0
    }

    pub fn extract_with_stats(
        &self,
        text: &str,
        spans: &[EntitySpan],
        analysis: &Analysis,
    ) -> (Vec<ExtractedRelationship>, RelationStats) {
        let start = instant::Instant::now();

        let mut sorted: Vec<&EntitySpan> = spans.iter().filter(|s| span_in_bounds(text, s)).collect();
        sorted.sort_by_key(|s| (s.start, s.end));

        let mut found = Vec::new();
        let mut pairs_scanned = 0;

        for sentence in &analysis.sentences {
            let in_sentence: Vec<&EntitySpan> = sorted
                .iter()
                .copied()
                .filter(|s| s.start >= sentence.start && s.end <= sentence.end)
                .collect();
            pairs_scanned += self.extract_sentence(text, sentence, &in_sentence, &mut found);
        }

        self.extract_possession(text, &sorted, &mut found);
        pairs_scanned += self.extract_span_patterns(text, &sorted, &mut found);

        let relationships = self.deduplicate(found);
        let stats = RelationStats {
            rules_checked: self.rules.len(),
            pairs_scanned,
            relationships_found: relationships.len(),
            scan_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        (relationships, stats)
    }

    // -------------------------------------------------------------------------
    // SVO + PREP
    // -------------------------------------------------------------------------

    fn extract_sentence(
        &self,
        text: &str,
        sentence: &AnalyzedSentence,
        spans: &[&EntitySpan],
        out: &mut Vec<ExtractedRelationship>,
    ) -> usize {
        let mut pairs = 0;
        for (i, source) in spans.iter().enumerate() {
            let source_last = match sentence.last_token_index_at(source.start, source.end) {
                Some(idx) => idx,
                None => continue,
            };
            for target in &spans[i + 1..] {
                if target.start < source.end || source.key() == target.key() {
                    continue;
                }
                let target_first = match sentence.token_index_at(target.start, target.end) {
                    Some(idx) => idx,
                    None => continue,
                };
                if target_first <= source_last || target_first - source_last > self.config.max_token_distance {
                    continue;
                }
                pairs += 1;

                let between = &sentence.tokens[source_last + 1..target_first];
                self.svo(text, source, target, between, out);
                self.prep(text, source, target, between, out);
            }
        }
        pairs
    }

    fn svo(
        &self,
        text: &str,
        source: &EntitySpan,
        target: &EntitySpan,
        between: &[AnalyzedToken],
        out: &mut Vec<ExtractedRelationship>,
    ) {
        let verbs: Vec<_> = between
            .iter()
            .filter(|t| matches!(t.pos, PosTag::Verb | PosTag::Auxiliary))
            .collect();
        if verbs.is_empty() {
            return;
        }

        let hit = verbs.iter().find_map(|t| {
            self.rules
                .verb_rule(&t.lemma, source.kind.as_deref(), target.kind.as_deref())
                .map(|rule| (t, rule))
        });

        match hit {
            Some((token, rule)) => self.emit(
                text,
                source,
                target,
                &rule.relation_type,
                RelationPattern::Svo,
                rule.confidence,
                rule.symmetric,
                &[("trigger", token.text.as_str()), ("lemma", token.lemma.as_str())],
                out,
            ),
            None => {
                // Main verbs beat auxiliaries for the fallback predicate
                let token = verbs
                    .iter()
                    .find(|t| t.pos == PosTag::Verb)
                    .unwrap_or(&verbs[0]);
                let predicate = token.text.to_uppercase();
                self.emit(
                    text,
                    source,
                    target,
                    &predicate,
                    RelationPattern::Svo,
                    self.config.svo_fallback_confidence,
                    false,
                    &[("trigger", token.text.as_str()), ("fallback", "true")],
                    out,
                );
            }
        }
    }

    fn prep(
        &self,
        text: &str,
        source: &EntitySpan,
        target: &EntitySpan,
        between: &[AnalyzedToken],
        out: &mut Vec<ExtractedRelationship>,
    ) {
        let hit = between
            .iter()
            .filter(|t| t.pos == PosTag::Preposition)
            .find_map(|t| {
                self.rules
                    .preposition_rule(&t.lemma, target.kind.as_deref())
                    .map(|rule| (t, rule))
            });
        if let Some((token, rule)) = hit {
            self.emit(
                text,
                source,
                target,
                &rule.relation_type,
                RelationPattern::Prep,
                rule.confidence,
                rule.symmetric,
                &[("trigger", token.text.as_str())],
                out,
            );
        }
    }

    // -------------------------------------------------------------------------
    // POSSESSION
    // -------------------------------------------------------------------------

    fn extract_possession(&self, text: &str, spans: &[&EntitySpan], out: &mut Vec<ExtractedRelationship>) {
        for (i, owner) in spans.iter().enumerate() {
            let rest = &text[owner.end..];
            if !["'s", "’s", "'", "’"].iter().any(|m| rest.starts_with(m)) {
                continue;
            }
            let owned = spans[i + 1..].iter().find(|s| {
                s.start >= owner.end && s.start - owner.end <= self.config.possession_window && s.key() != owner.key()
            });
            if let Some(owned) = owned {
                self.emit(
                    text,
                    owner,
                    owned,
                    POSSESSES,
                    RelationPattern::Possession,
                    self.config.possession_confidence,
                    false,
                    &[],
                    out,
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // VERB PATTERN / CO-OCCURRENCE
    // -------------------------------------------------------------------------

    /// Neighbouring spans only. Returns pairs scanned.
    fn extract_span_patterns(&self, text: &str, spans: &[&EntitySpan], out: &mut Vec<ExtractedRelationship>) -> usize {
        let mut pairs = 0;
        for window in spans.windows(2) {
            let (source, target) = (window[0], window[1]);
            if target.start < source.end || source.key() == target.key() {
                continue;
            }
            let gap = target.start - source.end;
            if gap > self.config.max_span_gap {
                continue;
            }
            pairs += 1;

            let between = &text[source.end..target.start];
            let best = self
                .verb_patterns
                .iter()
                .filter_map(|p| p.regex.find(between).map(|m| (p, m.as_str())))
                .fold(None, |best: Option<(&CompiledVerbPattern, &str)>, cur| match best {
                    Some(b) if b.0.confidence >= cur.0.confidence => Some(b),
                    _ => Some(cur),
                });

            if let Some((pattern, phrase)) = best {
                self.emit(
                    text,
                    source,
                    target,
                    &pattern.relation_type,
                    RelationPattern::VerbPattern,
                    pattern.confidence,
                    pattern.symmetric,
                    &[("phrase", phrase)],
                    out,
                );
                continue;
            }

            if self.config.enable_co_occurrence {
                let strength = self.co_occurrence_strength(gap);
                if strength >= self.config.co_occurrence_min_strength {
                    let strength_text = format!("{strength:.3}");
                    self.emit(
                        text,
                        source,
                        target,
                        CO_OCCURS_WITH,
                        RelationPattern::CoOccurrence,
                        strength * self.config.co_occurrence_weight,
                        false,
                        &[("strength", strength_text.as_str())],
                        out,
                    );
                }
            }
        }
        pairs
    }

    /// 1.0 when adjacent, linearly down to 0.1 at the max proximity.
    pub fn co_occurrence_strength(&self, distance: usize) -> f64 {
        let max = self.config.co_occurrence_max_proximity.max(1) as f64;
        (1.0 - 0.9 * (distance as f64 / max)).max(0.1)
    }

    // -------------------------------------------------------------------------
    // Emission + dedup
    // -------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        text: &str,
        source: &EntitySpan,
        target: &EntitySpan,
        predicate: &str,
        pattern: RelationPattern,
        confidence: f64,
        symmetric: bool,
        metadata: &[(&str, &str)],
        out: &mut Vec<ExtractedRelationship>,
    ) {
        let mut meta: HashMap<String, String> = metadata.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        if symmetric {
            meta.insert("symmetric".to_string(), "true".to_string());
        }
        let context = sentence_around(text, source.start, source.end).to_string();
        let confidence = confidence.clamp(0.0, 1.0);

        let forward = ExtractedRelationship {
            source: RelationEnd::from_span(source),
            target: RelationEnd::from_span(target),
            predicate: predicate.to_string(),
            pattern,
            confidence,
            context,
            metadata: meta,
        };
        if symmetric {
            let mut reverse = forward.clone();
            std::mem::swap(&mut reverse.source, &mut reverse.target);
            out.push(forward);
            out.push(reverse);
        } else {
            out.push(forward);
        }
    }

    /// Merge by (source, target, predicate). Repeated evidence raises the
    /// kept confidence by `dedup_boost × incoming`, capped at 1.0.
    pub fn deduplicate(&self, relationships: Vec<ExtractedRelationship>) -> Vec<ExtractedRelationship> {
        let mut index: HashMap<(String, String, String), usize> = HashMap::new();
        let mut kept: Vec<ExtractedRelationship> = Vec::with_capacity(relationships.len());

        for rel in relationships {
            let key = (rel.source.key(), rel.target.key(), rel.predicate.clone());
            match index.get(&key) {
                Some(&i) => {
                    let existing = &mut kept[i];
                    existing.confidence = (existing.confidence + self.config.dedup_boost * rel.confidence).min(1.0);
                }
                None => {
                    index.insert(key, kept.len());
                    kept.push(rel);
                }
            }
        }
        kept
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::analyzer::{LinguisticAnalyzer, RuleAnalyzer};

    fn span(text: &str, label: &str, kind: &str) -> EntitySpan {
        let start = text.find(label).expect("label in text");
        EntitySpan::new(label, start, start + label.len()).with_kind(kind)
    }

    fn extract(cortex: &RelationCortex, text: &str, spans: &[EntitySpan]) -> Vec<ExtractedRelationship> {
        let analysis = RuleAnalyzer::new().analyze(text);
        cortex.extract(text, spans, &analysis)
    }

    fn default_cortex() -> RelationCortex {
        RelationCortex::new(RelationConfig::default()).expect("default rules compile")
    }

    fn find<'a>(rels: &'a [ExtractedRelationship], from: &str, to: &str, predicate: &str) -> Option<&'a ExtractedRelationship> {
        rels.iter()
            .find(|r| r.source.text == from && r.target.text == to && r.predicate == predicate)
    }

    // -------------------------------------------------------------------------
    // Requirement 1: SVO with a verb rule, symmetric
    // -------------------------------------------------------------------------
    #[test]
    fn test_svo_rule_symmetric() {
        let text = "Jon Snow met Samwell Tarly.";
        let spans = vec![span(text, "Jon Snow", "CHARACTER"), span(text, "Samwell Tarly", "CHARACTER")];
        let rels = extract(&default_cortex(), text, &spans);

        let knows = find(&rels, "Jon Snow", "Samwell Tarly", "KNOWS").expect("forward KNOWS");
        assert_eq!(knows.pattern, RelationPattern::Svo);
        assert!(knows.confidence >= 0.65 && knows.confidence <= 1.0);
        assert_eq!(knows.context, text);
        assert!(find(&rels, "Samwell Tarly", "Jon Snow", "KNOWS").is_some());
    }

    #[test]
    fn test_explicit_syntax_spans() {
        let text = "[CHARACTER|Jon Snow] met [CHARACTER|Samwell Tarly].";
        let spans = vec![
            EntitySpan::new("Jon Snow", 0, 20).with_kind("CHARACTER"),
            EntitySpan::new("Samwell Tarly", 25, 50).with_kind("CHARACTER"),
        ];
        let rels = extract(&default_cortex(), text, &spans);
        let knows = find(&rels, "Jon Snow", "Samwell Tarly", "KNOWS").expect("KNOWS");
        assert!(knows.confidence >= 0.65);
        assert_eq!(knows.metadata.get("symmetric").map(String::as_str), Some("true"));
    }

    // -------------------------------------------------------------------------
    // Requirement 2: SVO fallback uses the raw verb
    // -------------------------------------------------------------------------
    #[test]
    fn test_svo_fallback() {
        let text = "Arya stabbed Brienne.";
        let spans = vec![span(text, "Arya", "CHARACTER"), span(text, "Brienne", "CHARACTER")];
        let cortex = RelationCortex::with_rules(RelationConfig::default(), RelationRules::new()).expect("builds");
        let rels = extract(&cortex, text, &spans);
        let rel = find(&rels, "Arya", "Brienne", "STABBED").expect("fallback");
        assert!((rel.confidence - 0.6).abs() < 1e-9);
        assert_eq!(rel.metadata.get("fallback").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_token_distance_limit() {
        let text = "Arya ran and ran and ran and ran and ran and ran and ran past Brienne.";
        let spans = vec![span(text, "Arya", "CHARACTER"), span(text, "Brienne", "CHARACTER")];
        let config = RelationConfig {
            enable_co_occurrence: false,
            ..RelationConfig::default()
        };
        let cortex = RelationCortex::with_rules(config, RelationRules::new()).expect("builds");
        assert!(extract(&cortex, text, &spans).is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 3: PREP prefers the rule matching the target kind
    // -------------------------------------------------------------------------
    #[test]
    fn test_prep_rule_selection() {
        let mut rules = RelationRules::new();
        rules.add_preposition_rule(RelationRule::new("of", "MEMBER_OF", 0.7).with_target_kinds(&["FACTION"]));
        rules.add_preposition_rule(RelationRule::new("of", "ORIGINATES_FROM", 0.65).with_target_kinds(&["LOCATION"]));
        let config = RelationConfig {
            enable_co_occurrence: false,
            ..RelationConfig::default()
        };
        let cortex = RelationCortex::with_rules(config, rules).expect("builds");

        let text = "Boromir of Gondor";
        let cases = [("LOCATION", "ORIGINATES_FROM"), ("FACTION", "MEMBER_OF"), ("CHARACTER", "MEMBER_OF")];
        for (kind, expected) in cases {
            let spans = vec![span(text, "Boromir", "CHARACTER"), span(text, "Gondor", kind)];
            let rels = extract(&cortex, text, &spans);
            assert_eq!(rels.len(), 1, "kind {kind}");
            assert_eq!(rels[0].predicate, expected);
            assert_eq!(rels[0].pattern, RelationPattern::Prep);
        }
    }

    // -------------------------------------------------------------------------
    // Requirement 4: Possession
    // -------------------------------------------------------------------------
    #[test]
    fn test_possession() {
        let text = "Frodo's ring glowed.";
        let spans = vec![span(text, "Frodo", "CHARACTER"), span(text, "ring", "ITEM")];
        let rels = extract(&default_cortex(), text, &spans);
        let rel = find(&rels, "Frodo", "ring", POSSESSES).expect("possession");
        assert_eq!(rel.pattern, RelationPattern::Possession);
        assert!((rel.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_possession_window() {
        let text = "Frodo's long and weary road eventually led to the ring.";
        let spans = vec![span(text, "Frodo", "CHARACTER"), span(text, "ring", "ITEM")];
        let rels = extract(&default_cortex(), text, &spans);
        assert!(find(&rels, "Frodo", "ring", POSSESSES).is_none());
    }

    // -------------------------------------------------------------------------
    // Requirement 5: Verb patterns over the gap
    // -------------------------------------------------------------------------
    #[test]
    fn test_verb_pattern() {
        let text = "Aragorn is the son of Arathorn";
        let spans = vec![span(text, "Aragorn", "CHARACTER"), span(text, "Arathorn", "CHARACTER")];
        let rels = extract(&default_cortex(), text, &spans);
        let rel = find(&rels, "Aragorn", "Arathorn", "CHILD_OF").expect("CHILD_OF");
        assert_eq!(rel.pattern, RelationPattern::VerbPattern);
        assert!((rel.confidence - 0.95).abs() < 1e-9);
        assert_eq!(rel.metadata.get("phrase").map(String::as_str), Some("son of"));
    }

    #[test]
    fn test_large_gap_skipped() {
        let text = format!("Aragorn son of {}Arathorn", "and ".repeat(60));
        let spans = vec![span(&text, "Aragorn", "CHARACTER"), span(&text, "Arathorn", "CHARACTER")];
        assert!(extract(&default_cortex(), &text, &spans).is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 6: Co-occurrence decays with distance
    // -------------------------------------------------------------------------
    #[test]
    fn test_co_occurrence() {
        let text = "Merry and Pippin";
        let spans = vec![span(text, "Merry", "CHARACTER"), span(text, "Pippin", "CHARACTER")];
        let rels = extract(&default_cortex(), text, &spans);
        assert_eq!(rels.len(), 1);
        let rel = &rels[0];
        assert_eq!(rel.predicate, CO_OCCURS_WITH);
        // strength 1 - 0.9 * 5/100 = 0.955, weighted by 0.5
        assert!((rel.confidence - 0.4775).abs() < 1e-9);
    }

    #[test]
    fn test_co_occurrence_cutoff() {
        let cortex = default_cortex();
        assert!((cortex.co_occurrence_strength(0) - 1.0).abs() < 1e-9);
        assert!((cortex.co_occurrence_strength(100) - 0.1).abs() < 1e-9);
        assert!((cortex.co_occurrence_strength(500) - 0.1).abs() < 1e-9);

        let text = format!("Merry {}Pippin", "la ".repeat(30));
        let spans = vec![span(&text, "Merry", "CHARACTER"), span(&text, "Pippin", "CHARACTER")];
        assert!(extract(&cortex, &text, &spans).is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 7: Dedup boosts instead of averaging
    // -------------------------------------------------------------------------
    #[test]
    fn test_dedup_boost() {
        let cortex = default_cortex();
        let rel = |confidence: f64| ExtractedRelationship {
            source: RelationEnd { entity_id: Some("a".into()), text: "A".into(), position: 0 },
            target: RelationEnd { entity_id: Some("b".into()), text: "B".into(), position: 5 },
            predicate: "KNOWS".into(),
            pattern: RelationPattern::Svo,
            confidence,
            context: String::new(),
            metadata: HashMap::new(),
        };

        let merged = cortex.deduplicate(vec![rel(0.7), rel(0.5)]);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.8).abs() < 1e-9);

        let capped = cortex.deduplicate(vec![rel(0.95), rel(0.9)]);
        assert!((capped[0].confidence - 1.0).abs() < 1e-9);
    }

    // -------------------------------------------------------------------------
    // Requirement 8: Same entity never relates to itself
    // -------------------------------------------------------------------------
    #[test]
    fn test_same_entity_skipped() {
        let text = "Strider met Aragorn.";
        let spans = vec![
            span(text, "Strider", "CHARACTER").with_id("aragorn"),
            span(text, "Aragorn", "CHARACTER").with_id("aragorn"),
        ];
        assert!(extract(&default_cortex(), text, &spans).is_empty());
    }

    #[test]
    fn test_stats_and_bounds() {
        let text = "Jon Snow met Samwell Tarly in Castle Black.";
        let spans = vec![
            span(text, "Jon Snow", "CHARACTER"),
            span(text, "Samwell Tarly", "CHARACTER"),
            span(text, "Castle Black", "LOCATION"),
        ];
        let analysis = RuleAnalyzer::new().analyze(text);
        let (rels, stats) = default_cortex().extract_with_stats(text, &spans, &analysis);
        assert_eq!(stats.relationships_found, rels.len());
        assert!(stats.pairs_scanned >= 3);
        assert!(find(&rels, "Samwell Tarly", "Castle Black", "LOCATED_IN").is_some());
        assert!(rels.iter().all(|r| (0.0..=1.0).contains(&r.confidence)));
    }

    #[test]
    fn test_phrases_are_literal() {
        // Phrases are escaped, so regex metacharacters are literal
        let mut rules = RelationRules::new();
        rules.add_verb_pattern("ODD", &["(weird)+ of"], 0.5, false);
        assert!(RelationCortex::with_rules(RelationConfig::default(), rules).is_ok());
    }

    // -------------------------------------------------------------------------
    // Requirement 9: Spans off a char boundary are dropped, not sliced
    // -------------------------------------------------------------------------
    #[test]
    fn test_span_inside_multibyte_char_dropped() {
        let text = "Éowyn's sword met Merry.";
        let spans = vec![
            EntitySpan::new("Éowyn", 0, 1).with_kind("CHARACTER"),
            span(text, "Merry", "CHARACTER"),
        ];
        let rels = extract(&default_cortex(), text, &spans);
        assert!(rels.is_empty());

        let spans = vec![span(text, "Éowyn", "CHARACTER"), span(text, "Merry", "CHARACTER")];
        let rels = extract(&default_cortex(), text, &spans);
        assert!(rels.iter().all(|r| r.confidence >= 0.0 && r.confidence <= 1.0));
    }

}
