//! SyntaxCortex - bracket micro-syntax detection
//!
//! Detects structured syntax patterns in documents:
//! - Full triples: [KIND|Subject] ->PREDICATE-> [KIND|Object]
//! - Inline triples: [KIND|Subject->PREDICATE->Object]
//! - Entities: [KIND|Label], [KIND:SUBTYPE|Label], [KIND|Label|{"attr":"value"}]
//! - Wikilinks: [[Target]] or [[Target|Display]]
//! - Backlinks: <<Target>> or <<Target|Display>>
//! - Tags: #tag
//! - Mentions: @name
//!
//! Two extraction strategies share the same pattern set and emit identical
//! events: `NaiveExtractor` runs every regex over the whole text,
//! `AutomatonExtractor` runs each regex only from discriminator hits.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scanner::discriminator::DiscriminatorAutomaton;
use crate::scanner::error::ScanError;

// ==================== TYPE DEFINITIONS ====================

/// Kind of syntax match detected
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Entity,
    Triple,
    Wikilink,
    Backlink,
    Tag,
    Mention,
    Temporal,
    Custom,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Entity => "entity",
            PatternKind::Triple => "triple",
            PatternKind::Wikilink => "wikilink",
            PatternKind::Backlink => "backlink",
            PatternKind::Tag => "tag",
            PatternKind::Mention => "mention",
            PatternKind::Temporal => "temporal",
            PatternKind::Custom => "custom",
        }
    }

    /// Entity and triple brackets state intent explicitly.
    pub fn is_explicit(&self) -> bool {
        matches!(self, PatternKind::Entity | PatternKind::Triple)
    }
}

/// Context handed to capture transforms.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    pub document_id: &'a str,
    pub full_text: &'a str,
    /// Start of the full match
    pub position: usize,
}

/// Normalizes a raw capture. An `Err` drops the whole match.
pub type CaptureTransform =
    Arc<dyn Fn(&str, &TransformContext<'_>) -> Result<String, String> + Send + Sync>;

/// Maps a regex group to a named capture.
#[derive(Clone)]
pub struct CaptureSpec {
    pub name: String,
    pub group: usize,
    pub transform: Option<CaptureTransform>,
}

impl fmt::Debug for CaptureSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSpec")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// A compiled syntax pattern.
///
/// When `discriminator` is set, every match of `regex` must begin with it.
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    pub id: String,
    pub kind: PatternKind,
    pub priority: i32,
    pub discriminator: Option<String>,
    pub regex: Regex,
    pub captures: Vec<CaptureSpec>,
    pub enabled: bool,
}

impl PatternDefinition {
    pub fn new(
        id: &str,
        kind: PatternKind,
        priority: i32,
        discriminator: Option<&str>,
        pattern: &str,
    ) -> Result<Self, ScanError> {
        let regex = Regex::new(pattern).map_err(|e| ScanError::InvalidRegex {
            pattern_id: id.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            id: id.to_string(),
            kind,
            priority,
            discriminator: discriminator.map(str::to_string),
            regex,
            captures: Vec::new(),
            enabled: true,
        })
    }

    pub fn capture(mut self, name: &str, group: usize) -> Self {
        self.captures.push(CaptureSpec {
            name: name.to_string(),
            group,
            transform: None,
        });
        self
    }

    pub fn capture_with(mut self, name: &str, group: usize, transform: CaptureTransform) -> Self {
        self.captures.push(CaptureSpec {
            name: name.to_string(),
            group,
            transform: Some(transform),
        });
        self
    }
}

/// A single syntax match result
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PatternMatchEvent {
    pub kind: PatternKind,
    pub full_match: String,
    pub position: usize,
    pub length: usize,
    pub captures: HashMap<String, String>,
    pub pattern_id: String,
    pub document_id: String,
    /// Unix millis
    pub timestamp: i64,
}

impl PatternMatchEvent {
    pub fn end(&self) -> usize {
        self.position + self.length
    }

    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

// ==================== DEFAULT PATTERNS ====================

const KIND: &str = r"[A-Z][A-Z0-9_]*";
const PREDICATE: &str = r"[A-Za-z_][A-Za-z0-9_]*";

fn trim() -> CaptureTransform {
    Arc::new(|raw, _| {
        let value = raw.trim();
        if value.is_empty() {
            Err("empty label".to_string())
        } else {
            Ok(value.to_string())
        }
    })
}

fn json_object() -> CaptureTransform {
    Arc::new(|raw, _| match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => Ok(value.to_string()),
        Ok(_) => Err("attributes must be a JSON object".to_string()),
        Err(e) => Err(format!("invalid attribute JSON: {}", e)),
    })
}

/// The built-in bracket micro-syntax, highest priority first.
pub fn default_patterns() -> Result<Vec<PatternDefinition>, ScanError> {
    Ok(vec![
        // [KIND|Subject] ->PREDICATE-> [KIND|Object]
        PatternDefinition::new(
            "full_triple",
            PatternKind::Triple,
            100,
            Some("["),
            &format!(
                r"\[({KIND})\|([^\[\]|]+)\]\s*->\s*({PREDICATE})\s*->\s*\[({KIND})\|([^\[\]|]+)\]"
            ),
        )?
        .capture("subject_kind", 1)
        .capture_with("subject_label", 2, trim())
        .capture("predicate", 3)
        .capture("object_kind", 4)
        .capture_with("object_label", 5, trim()),
        // [KIND|Subject->PREDICATE->Object]
        PatternDefinition::new(
            "inline_triple",
            PatternKind::Triple,
            90,
            Some("["),
            &format!(r"\[({KIND})\|([^\[\]|>]+?)\s*->\s*({PREDICATE})\s*->\s*([^\[\]|>]+?)\]"),
        )?
        .capture("subject_kind", 1)
        .capture_with("subject_label", 2, trim())
        .capture("predicate", 3)
        .capture_with("object_label", 4, trim()),
        // [KIND|Label], [KIND:SUBTYPE|Label], [KIND|Label|{json}]
        PatternDefinition::new(
            "entity",
            PatternKind::Entity,
            80,
            Some("["),
            &format!(r"\[({KIND})(?::({KIND}))?\|([^\[\]|]+)(?:\|(\{{[^\[\]]*\}}))?\]"),
        )?
        .capture("entity_kind", 1)
        .capture("subtype", 2)
        .capture_with("label", 3, trim())
        .capture_with("attributes", 4, json_object()),
        // [[Target]] or [[Target|Display]]
        PatternDefinition::new(
            "wikilink",
            PatternKind::Wikilink,
            70,
            Some("[["),
            r"\[\[([^\[\]|]+)(?:\|([^\[\]]+))?\]\]",
        )?
        .capture_with("target", 1, trim())
        .capture_with("display", 2, trim()),
        // <<Target>> or <<Target|Display>>
        PatternDefinition::new(
            "backlink",
            PatternKind::Backlink,
            70,
            Some("<<"),
            r"<<([^<>|]+)(?:\|([^<>]+))?>>",
        )?
        .capture_with("target", 1, trim())
        .capture_with("display", 2, trim()),
        PatternDefinition::new("tag", PatternKind::Tag, 50, Some("#"), r"#([A-Za-z][\w\-/]*)")?
            .capture("tag", 1),
        PatternDefinition::new("mention", PatternKind::Mention, 50, Some("@"), r"@([A-Za-z][\w\-]*)")?
            .capture("name", 1),
    ])
}

// ==================== EXTRACTION ====================

/// Strategy seam: both implementations must emit identical events.
pub trait PatternExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Overlap-resolved events, sorted by position.
    fn extract(&self, text: &str, document_id: &str) -> Vec<PatternMatchEvent>;

    fn pattern_count(&self) -> usize;
}

struct Candidate {
    event: PatternMatchEvent,
    priority: i32,
}

fn build_event(
    pattern: &PatternDefinition,
    caps: &Captures<'_>,
    text: &str,
    document_id: &str,
    timestamp: i64,
) -> Result<Option<Candidate>, ScanError> {
    let full = match caps.get(0) {
        Some(m) => m,
        None => return Ok(None),
    };
    let ctx = TransformContext {
        document_id,
        full_text: text,
        position: full.start(),
    };

    let mut captures = HashMap::with_capacity(pattern.captures.len());
    for spec in &pattern.captures {
        let raw = match caps.get(spec.group) {
            Some(m) => m.as_str(),
            None => continue,
        };
        let value = match &spec.transform {
            Some(transform) => transform(raw, &ctx).map_err(|message| ScanError::MalformedPattern {
                pattern_id: pattern.id.clone(),
                message: format!("capture `{}`: {}", spec.name, message),
            })?,
            None => raw.to_string(),
        };
        captures.insert(spec.name.clone(), value);
    }

    Ok(Some(Candidate {
        event: PatternMatchEvent {
            kind: pattern.kind,
            full_match: full.as_str().to_string(),
            position: full.start(),
            length: full.len(),
            captures,
            pattern_id: pattern.id.clone(),
            document_id: document_id.to_string(),
            timestamp,
        },
        priority: pattern.priority,
    }))
}

fn push_candidate(
    out: &mut Vec<Candidate>,
    pattern: &PatternDefinition,
    caps: &Captures<'_>,
    text: &str,
    document_id: &str,
    timestamp: i64,
) {
    match build_event(pattern, caps, text, document_id, timestamp) {
        Ok(Some(candidate)) => out.push(candidate),
        Ok(None) => {}
        Err(e) => warn!(document_id, pattern_id = %pattern.id, error = %e, "skipping malformed match"),
    }
}

/// Sort by (position asc, priority desc) and keep non-overlapping events.
fn resolve_overlaps(mut candidates: Vec<Candidate>) -> Vec<PatternMatchEvent> {
    candidates.sort_by(|a, b| {
        a.event
            .position
            .cmp(&b.event.position)
            .then_with(|| b.priority.cmp(&a.priority))
    });

    let mut kept = Vec::with_capacity(candidates.len());
    let mut last_end = 0;
    for candidate in candidates {
        if candidate.event.position >= last_end {
            last_end = candidate.event.end();
            kept.push(candidate.event);
        }
    }
    kept
}

fn active(patterns: Vec<PatternDefinition>) -> Arc<[PatternDefinition]> {
    patterns.into_iter().filter(|p| p.enabled).collect::<Vec<_>>().into()
}

/// Sequential regex application over the whole text.
#[derive(Debug, Clone)]
pub struct NaiveExtractor {
    patterns: Arc<[PatternDefinition]>,
}

impl NaiveExtractor {
    pub fn new(patterns: Vec<PatternDefinition>) -> Self {
        Self {
            patterns: active(patterns),
        }
    }
}

impl PatternExtractor for NaiveExtractor {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn extract(&self, text: &str, document_id: &str) -> Vec<PatternMatchEvent> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let mut candidates = Vec::new();
        for pattern in self.patterns.iter() {
            for caps in pattern.regex.captures_iter(text) {
                push_candidate(&mut candidates, pattern, &caps, text, document_id, timestamp);
            }
        }
        resolve_overlaps(candidates)
    }

    fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Discriminator pre-filter, then localized regex parsing.
#[derive(Debug, Clone)]
pub struct AutomatonExtractor {
    patterns: Arc<[PatternDefinition]>,
    discriminators: DiscriminatorAutomaton,
}

impl AutomatonExtractor {
    pub fn new(patterns: Vec<PatternDefinition>) -> Result<Self, ScanError> {
        let patterns = active(patterns);
        let mut discriminators = DiscriminatorAutomaton::new();
        for pattern in patterns.iter() {
            if let Some(token) = &pattern.discriminator {
                discriminators.register(token, &pattern.id);
            }
        }
        discriminators.build()?;
        Ok(Self {
            patterns,
            discriminators,
        })
    }
}

impl PatternExtractor for AutomatonExtractor {
    fn name(&self) -> &'static str {
        "automaton"
    }

    fn extract(&self, text: &str, document_id: &str) -> Vec<PatternMatchEvent> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let hits = self.discriminators.find_all(text);
        let mut candidates = Vec::new();

        for pattern in self.patterns.iter() {
            if pattern.discriminator.is_none() {
                for caps in pattern.regex.captures_iter(text) {
                    push_candidate(&mut candidates, pattern, &caps, text, document_id, timestamp);
                }
                continue;
            }

            // A match can only start at an opener, so searching from the first
            // opener at or after `cursor` finds the same leftmost match a full
            // scan from `cursor` would.
            let mut cursor = 0;
            for hit in hits.iter().filter(|h| h.pattern_ids.iter().any(|id| *id == pattern.id)) {
                if hit.position < cursor {
                    continue;
                }
                let caps = match pattern.regex.captures_at(text, hit.position) {
                    Some(caps) => caps,
                    None => break,
                };
                if let Some(full) = caps.get(0) {
                    cursor = if full.is_empty() { full.end() + 1 } else { full.end() };
                }
                push_candidate(&mut candidates, pattern, &caps, text, document_id, timestamp);
            }
        }
        resolve_overlaps(candidates)
    }

    fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

/// Pick the extraction strategy.
pub fn build_extractor(
    patterns: Vec<PatternDefinition>,
    use_automaton: bool,
) -> Result<Box<dyn PatternExtractor>, ScanError> {
    if use_automaton {
        Ok(Box::new(AutomatonExtractor::new(patterns)?))
    } else {
        Ok(Box::new(NaiveExtractor::new(patterns)))
    }
}

// ==================== TESTS ====================

#[cfg(test)]
mod tests {
    use super::*;

    fn naive() -> NaiveExtractor {
        NaiveExtractor::new(default_patterns().unwrap())
    }

    fn automaton() -> AutomatonExtractor {
        AutomatonExtractor::new(default_patterns().unwrap()).unwrap()
    }

    fn normalized(mut events: Vec<PatternMatchEvent>) -> Vec<PatternMatchEvent> {
        for e in &mut events {
            e.timestamp = 0;
        }
        events
    }

    // -------------------------------------------------------------------------
    // Requirement 1: Entity syntax variants
    // -------------------------------------------------------------------------
    #[test]
    fn test_entity_simple() {
        let events = automaton().extract("[CHARACTER|Aragorn] is the king", "doc");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PatternKind::Entity);
        assert_eq!(events[0].capture("entity_kind"), Some("CHARACTER"));
        assert_eq!(events[0].capture("label"), Some("Aragorn"));
        assert_eq!(events[0].capture("subtype"), None);
        assert_eq!(events[0].position, 0);
        assert_eq!(events[0].length, "[CHARACTER|Aragorn]".len());
    }

    #[test]
    fn test_entity_with_subtype() {
        let events = automaton().extract("[CHARACTER:WIZARD|Gandalf]", "doc");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].capture("subtype"), Some("WIZARD"));
        assert_eq!(events[0].capture("label"), Some("Gandalf"));
    }

    #[test]
    fn test_entity_with_attributes() {
        let events = automaton().extract(r#"[ITEM|Sting|{"material": "elven"}]"#, "doc");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].capture("label"), Some("Sting"));
        assert_eq!(events[0].capture("attributes"), Some(r#"{"material":"elven"}"#));
    }

    #[test]
    fn test_kind_is_case_sensitive() {
        assert!(automaton().extract("[character|Zoro]", "doc").is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 2: Malformed transform skips only that match
    // -------------------------------------------------------------------------
    #[test]
    fn test_bad_attributes_skip_match() {
        let events = automaton().extract("[ITEM|Sword|{bad}] and #lore", "doc");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PatternKind::Tag);
    }

    // -------------------------------------------------------------------------
    // Requirement 3: Triples
    // -------------------------------------------------------------------------
    #[test]
    fn test_full_triple_beats_entities() {
        let text = "[CHARACTER|Frodo] ->CARRIES-> [ITEM|The One Ring]";
        let events = automaton().extract(text, "doc");
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.pattern_id, "full_triple");
        assert_eq!(e.capture("subject_label"), Some("Frodo"));
        assert_eq!(e.capture("predicate"), Some("CARRIES"));
        assert_eq!(e.capture("object_kind"), Some("ITEM"));
        assert_eq!(e.capture("object_label"), Some("The One Ring"));
        assert_eq!(e.end(), text.len());
    }

    #[test]
    fn test_inline_triple() {
        let events = automaton().extract("[CHARACTER|Sam->FRIEND_OF->Frodo]", "doc");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pattern_id, "inline_triple");
        assert_eq!(events[0].capture("subject_label"), Some("Sam"));
        assert_eq!(events[0].capture("predicate"), Some("FRIEND_OF"));
        assert_eq!(events[0].capture("object_label"), Some("Frodo"));
    }

    // -------------------------------------------------------------------------
    // Requirement 4: Links, tags, mentions
    // -------------------------------------------------------------------------
    #[test]
    fn test_links_tags_mentions() {
        let text = "Visit [[Rivendell|The Last Homely House]] via <<Chapter One>> #travel @elrond";
        let events = automaton().extract(text, "doc");
        let kinds: Vec<PatternKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![PatternKind::Wikilink, PatternKind::Backlink, PatternKind::Tag, PatternKind::Mention]
        );
        assert_eq!(events[0].capture("target"), Some("Rivendell"));
        assert_eq!(events[0].capture("display"), Some("The Last Homely House"));
        assert_eq!(events[1].capture("target"), Some("Chapter One"));
        assert_eq!(events[2].capture("tag"), Some("travel"));
        assert_eq!(events[3].capture("name"), Some("elrond"));
    }

    #[test]
    fn test_html_entity_not_a_tag() {
        let events = automaton().extract("Code: &#123; is not a tag", "doc");
        assert!(events.is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 5: Overlaps resolve to earlier, then higher priority
    // -------------------------------------------------------------------------
    #[test]
    fn test_wikilink_hides_inner_entity() {
        let events = automaton().extract("[[CHARACTER|Jon]]", "doc");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PatternKind::Wikilink);
        assert_eq!(events[0].capture("target"), Some("CHARACTER"));
    }

    #[test]
    fn test_tag_inside_entity_dropped() {
        let events = automaton().extract("[ITEM|Sword #one]", "doc");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, PatternKind::Entity);
    }

    // -------------------------------------------------------------------------
    // Requirement 6: Malformed bracket yields nothing
    // -------------------------------------------------------------------------
    #[test]
    fn test_unclosed_bracket() {
        assert!(automaton().extract("[ not valid", "doc").is_empty());
        assert!(naive().extract("[ not valid", "doc").is_empty());
        assert!(automaton().extract("[CHARACTER|Jon", "doc").is_empty());
    }

    // -------------------------------------------------------------------------
    // Requirement 7: Both strategies are equivalent
    // -------------------------------------------------------------------------
    #[test]
    fn test_extractor_equivalence() {
        let corpus = [
            "",
            "plain prose with no syntax at all",
            "[CHARACTER|Jon Snow] met [CHARACTER|Samwell Tarly].",
            "[CHARACTER|Frodo] ->CARRIES-> [ITEM|Ring] then [[Mordor]] and <<Index>>",
            "[[CHARACTER|Jon]] [[[[nested]]]] [ [X|y] [[a|b]] #t1 #2bad @x-y @@z",
            "[PLACE|Bree|{\"k\":1}] [PLACE|Bad|{oops}] [FACTION:GUILD|Thieves]",
            "[CHARACTER|Sam->FRIEND_OF->Frodo] [CHARACTER|Sam->->Frodo]",
            "Éowyn #rohan @théoden [[Édoras]] <<unterminated",
            "<<a>><<b|c>>##tag##other@@",
        ];
        let naive = naive();
        let automaton = automaton();
        for text in corpus {
            let a = normalized(naive.extract(text, "doc-1"));
            let b = normalized(automaton.extract(text, "doc-1"));
            assert_eq!(a, b, "strategies diverged on {:?}", text);
        }
    }

    #[test]
    fn test_extractor_equivalence_generated() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        const ALPHABET: &[char] = &[
            '[', ']', '|', '-', '>', '<', '#', '@', ' ', ':', 'a', 'b', 'c', 'A', 'B', 'É',
        ];

        let naive = naive();
        let automaton = automaton();
        let mut rng = ChaCha8Rng::seed_from_u64(0x5ca9);
        for _ in 0..10_000 {
            let len = rng.gen_range(0..40);
            let text: String = (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]).collect();

            let a = normalized(naive.extract(&text, "doc-1"));
            let b = normalized(automaton.extract(&text, "doc-1"));
            assert_eq!(a, b, "strategies diverged on {:?}", text);
        }
    }

    // -------------------------------------------------------------------------
    // Requirement 8: Positions stay within the document
    // -------------------------------------------------------------------------
    #[test]
    fn test_positions_in_bounds() {
        let text = "[[A]] [B|c] #d @e <<f>>";
        for e in automaton().extract(text, "doc") {
            assert!(e.end() <= text.len());
            assert_eq!(&text[e.position..e.end()], e.full_match);
            assert_eq!(e.document_id, "doc");
        }
    }

    // -------------------------------------------------------------------------
    // Requirement 9: Transforms see document context
    // -------------------------------------------------------------------------
    #[test]
    fn test_transform_context() {
        let pattern = PatternDefinition::new("upper_tag", PatternKind::Custom, 10, Some("$"), r"\$(\w+)")
            .unwrap()
            .capture_with(
                "value",
                1,
                Arc::new(|raw, ctx| Ok(format!("{}:{}:{}", ctx.document_id, ctx.position, raw.to_uppercase()))),
            );
        let extractor = AutomatonExtractor::new(vec![pattern]).unwrap();
        let events = extractor.extract("pay $gold now", "ledger");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].capture("value"), Some("ledger:4:GOLD"));
    }

    #[test]
    fn test_disabled_and_undiscriminated_patterns() {
        let mut disabled = PatternDefinition::new("off", PatternKind::Custom, 1, None, r"prose").unwrap();
        disabled.enabled = false;
        let free = PatternDefinition::new("year", PatternKind::Custom, 1, None, r"\b(\d{4})\b")
            .unwrap()
            .capture("year", 1);
        let extractor = build_extractor(vec![disabled, free.clone()], true).unwrap();
        assert_eq!(extractor.pattern_count(), 1);
        let events = extractor.extract("prose from 3019 and 3021", "doc");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].capture("year"), Some("3021"));

        let naive = build_extractor(vec![free], false).unwrap();
        assert_eq!(naive.name(), "naive");
    }

    #[test]
    fn test_invalid_regex_reported() {
        let err = PatternDefinition::new("broken", PatternKind::Custom, 1, None, "(").unwrap_err();
        assert!(matches!(err, ScanError::InvalidRegex { ref pattern_id, .. } if pattern_id == "broken"));
    }
}
