//! TemporalCortex - Temporal pattern detection via Aho-Corasick
//!
//! Detects temporal expressions in O(n) time using CharwiseDoubleArrayAhoCorasick
//! over a case-folded copy of the text that keeps byte offsets aligned with the
//! source. Custom calendars (fantasy months, weekdays, eras) are inserted ahead
//! of the generic dictionary via hydration.
//!
//! # Categories
//! - WEEKDAY: monday, tue, wed, etc.
//! - MONTH: january, jan, etc.
//! - TIME_OF_DAY: morning, dusk, midnight, etc.
//! - NARRATIVE_MARKER: chapter, scene, act, etc.
//! - RELATIVE: "later that day", "the next morning", etc.
//! - CONNECTOR: before, after, during, etc.
//! - ERA: "third age", ad, bc, stardate, etc.

use std::collections::HashSet;

use daachorse::{CharwiseDoubleArrayAhoCorasick, CharwiseDoubleArrayAhoCorasickBuilder, MatchKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::scanner::error::ScanError;
use crate::scanner::registry::CalendarRegistry;

// ==================== TYPE DEFINITIONS ====================

/// Kind of temporal pattern detected
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TemporalKind {
    Weekday,
    Month,
    TimeOfDay,
    NarrativeMarker,
    Relative,
    Connector,
    Era,
}

impl TemporalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalKind::Weekday => "WEEKDAY",
            TemporalKind::Month => "MONTH",
            TemporalKind::TimeOfDay => "TIME_OF_DAY",
            TemporalKind::NarrativeMarker => "NARRATIVE_MARKER",
            TemporalKind::Relative => "RELATIVE",
            TemporalKind::Connector => "CONNECTOR",
            TemporalKind::Era => "ERA",
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            TemporalKind::NarrativeMarker => 0.95,
            TemporalKind::Weekday => 0.90,
            TemporalKind::Month => 0.90,
            TemporalKind::Era => 0.90,
            TemporalKind::TimeOfDay => 0.85,
            TemporalKind::Relative => 0.80,
            TemporalKind::Connector => 0.70,
        }
    }
}

/// Direction for temporal connectors
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TemporalDirection {
    Before,
    After,
    Concurrent,
}

/// Metadata extracted from temporal mentions
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TemporalMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday_index: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month_index: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<TemporalDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub era_year: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub era_name: Option<String>,
}

impl TemporalMetadata {
    fn is_empty(&self) -> bool {
        *self == TemporalMetadata::default()
    }
}

/// A single temporal mention result
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TemporalMention {
    pub kind: TemporalKind,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemporalMetadata>,
}

/// Scan result with statistics
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TemporalScanResult {
    pub mentions: Vec<TemporalMention>,
    pub stats: TemporalScanStats,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TemporalScanStats {
    pub patterns_matched: usize,
    pub scan_time_ms: f64,
}

/// Dictionary statistics
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TemporalDictionaryStats {
    pub total_patterns: usize,
    pub weekdays: usize,
    pub months: usize,
    pub time_of_day: usize,
    pub narrative_markers: usize,
    pub relative_phrases: usize,
    pub connectors: usize,
    pub eras: usize,
    pub custom: usize,
}

// ==================== CALENDARS ====================

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MonthDefinition {
    pub name: String,
    pub days: u32,
}

/// A world's custom calendar
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(default)]
pub struct CalendarDefinition {
    pub id: String,
    /// Ordered; index is the month number (0-based)
    pub months: Vec<MonthDefinition>,
    /// Ordered; index is the weekday number (0-based)
    pub weekdays: Vec<String>,
    pub eras: Vec<String>,
}

// ==================== DICTIONARIES ====================

/// Pattern metadata for the automaton
#[derive(Clone, Debug)]
struct PatternMeta {
    kind: TemporalKind,
    weekday_idx: Option<u8>,
    month_idx: Option<u8>,
    direction: Option<TemporalDirection>,
    /// Display name for eras
    name: String,
    custom: bool,
}

// Weekdays (14 entries)
const WEEKDAYS: &[(&str, u8)] = &[
    ("monday", 0), ("mon", 0),
    ("tuesday", 1), ("tue", 1),
    ("wednesday", 2), ("wed", 2),
    ("thursday", 3), ("thu", 3),
    ("friday", 4), ("fri", 4),
    ("saturday", 5), ("sat", 5),
    ("sunday", 6), ("sun", 6),
];

// Months (23 entries)
const MONTHS: &[(&str, u8)] = &[
    ("january", 0), ("jan", 0),
    ("february", 1), ("feb", 1),
    ("march", 2), ("mar", 2),
    ("april", 3), ("apr", 3),
    ("may", 4),
    ("june", 5), ("jun", 5),
    ("july", 6), ("jul", 6),
    ("august", 7), ("aug", 7),
    ("september", 8), ("sep", 8),
    ("october", 9), ("oct", 9),
    ("november", 10), ("nov", 10),
    ("december", 11), ("dec", 11),
];

const NARRATIVE_MARKERS: &[&str] = &[
    "chapter", "ch.", "scene", "act", "part", "book",
    "episode", "ep.", "sequence", "prologue", "epilogue", "interlude",
];

const RELATIVE_PHRASES: &[&str] = &[
    // Same-day progressions
    "later that day", "later that night", "later that evening", "later that morning",
    "that morning", "that afternoon", "that evening", "that night",
    "earlier that day", "earlier that morning", "earlier that evening",
    // Next period
    "the next day", "the next morning", "the next evening", "the next night",
    "the next week", "the next month", "the next year",
    "next morning", "next evening", "next night", "next week", "next month", "next year",
    // Following period
    "the following day", "the following morning", "the following evening",
    "the following week", "the following month", "the following year",
    // Previous period
    "the previous day", "the previous morning", "the previous evening",
    "the day before", "the night before", "the week before",
    // Concurrent
    "meanwhile", "at the same time", "simultaneously", "in the meantime",
    "at that moment", "at that very moment", "just then",
    // Progression
    "moments later", "hours later", "days later", "weeks later", "months later", "years later",
    "a moment later", "an hour later", "a day later", "a week later", "a month later", "a year later",
    "some time later", "shortly after", "shortly before",
    // Vague
    "long ago", "once upon a time", "in the beginning", "at the end",
    "eventually", "soon", "finally", "at last", "in time",
    "ages ago", "not long after", "before long",
];

const TIME_OF_DAY: &[&str] = &[
    "morning", "afternoon", "evening", "night", "midnight", "noon", "midday",
    "dawn", "dusk", "twilight", "sunrise", "sunset", "nightfall", "daybreak",
    "early morning", "late morning", "early afternoon", "late afternoon",
    "late evening", "late night",
];

const CONNECTORS_BEFORE: &[&str] = &[
    "before", "prior to", "preceding", "just before", "right before",
    "immediately before", "long before",
];

const CONNECTORS_AFTER: &[&str] = &[
    "after", "following", "just after", "right after",
    "immediately after", "long after", "ever since",
];

const CONNECTORS_CONCURRENT: &[&str] = &[
    "during", "while", "throughout", "in the middle of",
];

const CONNECTORS_NEUTRAL: &[&str] = &[
    "when", "until", "since", "at the start of", "at the end of",
    "by the time", "as soon as",
];

const ERA_MARKERS: &[&str] = &[
    "third age", "second age", "first age", "fourth age", "fifth age",
    "year", "stardate", "epoch", "era", "age of", "millennium",
    "ad", "bc", "bce", "ce", "a.d.", "b.c.", "b.c.e.", "c.e.",
];

/// Dictionary words that are also common English words. They only count
/// when the source text capitalizes them.
const AMBIGUOUS: &[&str] = &[
    "may", "mar", "march", "sat", "sun", "wed", "jan",
    "ad", "bc", "bce", "ce", "act", "part", "book",
];

/// Lookahead windows for trailing numbers
const NARRATIVE_LOOKAHEAD: usize = 15;
const ERA_LOOKAHEAD: usize = 20;

/// Day ceiling when no calendar is hydrated
const DEFAULT_MAX_DAY: u32 = 31;

fn fold_char(c: char) -> char {
    if c.is_ascii() {
        return c.to_ascii_lowercase();
    }
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) if l.len_utf8() == c.len_utf8() => l,
        _ => c,
    }
}

/// Lowercase without changing any byte offset.
fn fold_case(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Slice `text[from..from + len]`, shortened to the nearest char boundary.
fn window(text: &str, from: usize, len: usize) -> &str {
    let mut end = (from + len).min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[from..end]
}

// ==================== MAIN IMPLEMENTATION ====================

struct Dictionary {
    patterns: Vec<String>,
    meta: Vec<PatternMeta>,
    seen: HashSet<String>,
}

impl Dictionary {
    fn new() -> Self {
        Self {
            patterns: Vec::new(),
            meta: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// First insertion of a folded pattern wins; later duplicates are dropped.
    fn add(&mut self, pattern: &str, meta: PatternMeta) -> bool {
        let folded = fold_case(pattern.trim());
        if folded.chars().count() < 2 || !self.seen.insert(folded.clone()) {
            return false;
        }
        self.patterns.push(folded);
        self.meta.push(meta);
        true
    }

    fn simple(kind: TemporalKind, name: &str) -> PatternMeta {
        PatternMeta {
            kind,
            weekday_idx: None,
            month_idx: None,
            direction: None,
            name: name.to_string(),
            custom: false,
        }
    }
}

/// TemporalCortex - Temporal expression detector
pub struct TemporalCortex {
    automaton: Option<CharwiseDoubleArrayAhoCorasick<usize>>,
    pattern_meta: Vec<PatternMeta>,
    calendar: Option<CalendarDefinition>,
    stats: TemporalDictionaryStats,
    ambiguous: HashSet<&'static str>,
    // Numbers after narrative markers and eras
    number_re: Regex,
}

impl std::fmt::Debug for TemporalCortex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalCortex")
            .field("patterns", &self.pattern_meta.len())
            .field("calendar", &self.calendar.as_ref().map(|c| c.id.as_str()))
            .finish()
    }
}

impl TemporalCortex {
    /// Create a new TemporalCortex with the default dictionary
    pub fn new() -> Result<Self, ScanError> {
        let number_re = Regex::new(r"^(?:\s+(?:of|in))?\s*(\d+(?:\.\d+)?)").map_err(|e| {
            ScanError::InvalidRegex {
                pattern_id: "temporal_number".to_string(),
                message: e.to_string(),
            }
        })?;

        let mut cortex = Self {
            automaton: None,
            pattern_meta: Vec::new(),
            calendar: None,
            stats: TemporalDictionaryStats::default(),
            ambiguous: AMBIGUOUS.iter().copied().collect(),
            number_re,
        };
        cortex.rebuild(None)?;
        Ok(cortex)
    }

    fn load_custom(dict: &mut Dictionary, calendar: &CalendarDefinition) -> usize {
        let mut count = 0;
        for (idx, month) in calendar.months.iter().enumerate() {
            let meta = PatternMeta {
                month_idx: u8::try_from(idx).ok(),
                custom: true,
                ..Dictionary::simple(TemporalKind::Month, &month.name)
            };
            count += dict.add(&month.name, meta) as usize;
        }
        for (idx, weekday) in calendar.weekdays.iter().enumerate() {
            let meta = PatternMeta {
                weekday_idx: u8::try_from(idx).ok(),
                custom: true,
                ..Dictionary::simple(TemporalKind::Weekday, weekday)
            };
            count += dict.add(weekday, meta) as usize;
        }
        for era in &calendar.eras {
            let meta = PatternMeta {
                custom: true,
                ..Dictionary::simple(TemporalKind::Era, era)
            };
            count += dict.add(era, meta) as usize;
        }
        count
    }

    /// Load the default temporal dictionary. Returns per-category counts of
    /// entries that were actually inserted.
    fn load_default(dict: &mut Dictionary, stats: &mut TemporalDictionaryStats) {
        for (pattern, idx) in WEEKDAYS {
            let meta = PatternMeta {
                weekday_idx: Some(*idx),
                ..Dictionary::simple(TemporalKind::Weekday, pattern)
            };
            stats.weekdays += dict.add(pattern, meta) as usize;
        }
        for (pattern, idx) in MONTHS {
            let meta = PatternMeta {
                month_idx: Some(*idx),
                ..Dictionary::simple(TemporalKind::Month, pattern)
            };
            stats.months += dict.add(pattern, meta) as usize;
        }
        for pattern in TIME_OF_DAY {
            stats.time_of_day += dict.add(pattern, Dictionary::simple(TemporalKind::TimeOfDay, pattern)) as usize;
        }
        for pattern in NARRATIVE_MARKERS {
            stats.narrative_markers +=
                dict.add(pattern, Dictionary::simple(TemporalKind::NarrativeMarker, pattern)) as usize;
        }
        for pattern in RELATIVE_PHRASES {
            stats.relative_phrases += dict.add(pattern, Dictionary::simple(TemporalKind::Relative, pattern)) as usize;
        }

        let connectors: [(&[&str], Option<TemporalDirection>); 4] = [
            (CONNECTORS_BEFORE, Some(TemporalDirection::Before)),
            (CONNECTORS_AFTER, Some(TemporalDirection::After)),
            (CONNECTORS_CONCURRENT, Some(TemporalDirection::Concurrent)),
            (CONNECTORS_NEUTRAL, None),
        ];
        for (list, direction) in connectors {
            for pattern in list {
                let meta = PatternMeta {
                    direction,
                    ..Dictionary::simple(TemporalKind::Connector, pattern)
                };
                stats.connectors += dict.add(pattern, meta) as usize;
            }
        }

        for pattern in ERA_MARKERS {
            stats.eras += dict.add(pattern, Dictionary::simple(TemporalKind::Era, pattern)) as usize;
        }
    }

    /// Rebuild the automaton. On error nothing is replaced.
    fn rebuild(&mut self, calendar: Option<CalendarDefinition>) -> Result<(), ScanError> {
        let mut dict = Dictionary::new();
        let mut stats = TemporalDictionaryStats::default();

        // Custom terms first so they shadow the generic entries
        if let Some(cal) = &calendar {
            stats.custom = Self::load_custom(&mut dict, cal);
        }
        Self::load_default(&mut dict, &mut stats);
        stats.total_patterns = dict.patterns.len();

        let pma = CharwiseDoubleArrayAhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .build(&dict.patterns)
            .map_err(|e| ScanError::AutomatonBuild(e.to_string()))?;

        self.automaton = Some(pma);
        self.pattern_meta = dict.meta;
        self.stats = stats;
        self.calendar = calendar;
        Ok(())
    }

    /// Hydrate with a world's calendar looked up from `source`.
    ///
    /// An unknown id fails with `UnknownCalendar` and leaves the current
    /// automaton in place.
    pub fn hydrate(&mut self, calendar_id: &str, source: &dyn CalendarRegistry) -> Result<(), ScanError> {
        let calendar = source
            .get_calendar(calendar_id)
            .ok_or_else(|| ScanError::UnknownCalendar(calendar_id.to_string()))?;
        self.hydrate_calendar(calendar)
    }

    pub fn hydrate_calendar(&mut self, calendar: CalendarDefinition) -> Result<(), ScanError> {
        let id = calendar.id.clone();
        self.rebuild(Some(calendar))?;
        debug!(calendar = %id, custom = self.stats.custom, "temporal calendar hydrated");
        Ok(())
    }

    /// Drop the hydrated calendar and return to the generic dictionary.
    pub fn clear_calendar(&mut self) -> Result<(), ScanError> {
        self.rebuild(None)
    }

    pub fn calendar_id(&self) -> Option<&str> {
        self.calendar.as_ref().map(|c| c.id.as_str())
    }

    /// Check a day number against the hydrated calendar. `month` is 0-based.
    pub fn validate_date(&self, month: usize, day: u32) -> bool {
        if day == 0 {
            return false;
        }
        match &self.calendar {
            Some(cal) if !cal.months.is_empty() => cal.months.get(month).map(|m| day <= m.days).unwrap_or(false),
            _ => day <= DEFAULT_MAX_DAY,
        }
    }

    /// Sorted, overlap-resolved temporal mentions.
    pub fn find_mentions(&self, text: &str) -> Vec<TemporalMention> {
        let pma = match &self.automaton {
            Some(pma) => pma,
            None => return Vec::new(),
        };

        let folded = fold_case(text);
        let mut mentions: Vec<TemporalMention> = Vec::new();

        for m in pma.find_overlapping_iter(&folded) {
            let (start, end) = (m.start(), m.end());
            let meta = &self.pattern_meta[m.value()];

            let before = text[..start].chars().next_back();
            let after = text[end..].chars().next();
            if before.map(is_word_char).unwrap_or(false) || after.map(is_word_char).unwrap_or(false) {
                continue;
            }

            let matched_text = &text[start..end];
            if !meta.custom && self.ambiguous.contains(&folded[start..end]) {
                let capitalized = matched_text.chars().next().map(char::is_uppercase).unwrap_or(false);
                if !capitalized {
                    continue;
                }
            }

            let metadata = self.extract_metadata(meta, text, end);
            mentions.push(TemporalMention {
                kind: meta.kind,
                text: matched_text.to_string(),
                start,
                end,
                confidence: meta.kind.confidence(),
                metadata: if metadata.is_empty() { None } else { Some(metadata) },
            });
        }

        Self::dedupe_overlapping(mentions)
    }

    /// Scan with timing statistics
    pub fn scan(&self, text: &str) -> TemporalScanResult {
        let start = instant::Instant::now();
        let mentions = self.find_mentions(text);
        TemporalScanResult {
            stats: TemporalScanStats {
                patterns_matched: mentions.len(),
                scan_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            },
            mentions,
        }
    }

    fn trailing_number<'t>(&self, text: &'t str, end: usize, lookahead: usize) -> Option<&'t str> {
        let after = window(text, end, lookahead);
        self.number_re
            .captures(after)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str())
    }

    fn extract_metadata(&self, meta: &PatternMeta, text: &str, end: usize) -> TemporalMetadata {
        let mut metadata = TemporalMetadata {
            weekday_index: meta.weekday_idx,
            month_index: meta.month_idx,
            direction: meta.direction,
            ..TemporalMetadata::default()
        };

        match meta.kind {
            // "Chapter 5" -> 5
            TemporalKind::NarrativeMarker => {
                metadata.narrative_number = self
                    .trailing_number(text, end, NARRATIVE_LOOKAHEAD)
                    .and_then(|n| n.parse::<u32>().ok());
            }
            // "Third Age 3019" -> 3019
            TemporalKind::Era => {
                metadata.era_year = self
                    .trailing_number(text, end, ERA_LOOKAHEAD)
                    .and_then(|n| n.parse::<f64>().ok());
                metadata.era_name = Some(meta.name.clone());
            }
            _ => {}
        }

        metadata
    }

    /// Deduplicate overlapping mentions, keeping longer matches
    fn dedupe_overlapping(mut mentions: Vec<TemporalMention>) -> Vec<TemporalMention> {
        mentions.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| (b.end - b.start).cmp(&(a.end - a.start)))
        });

        let mut result = Vec::with_capacity(mentions.len());
        let mut last_end = 0;
        for mention in mentions {
            if mention.start >= last_end {
                last_end = mention.end;
                result.push(mention);
            }
        }
        result
    }

    pub fn stats(&self) -> &TemporalDictionaryStats {
        &self.stats
    }

    pub fn is_ready(&self) -> bool {
        self.automaton.is_some()
    }
}

// ==================== TESTS ====================
