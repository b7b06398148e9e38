//! Linguistic analysis seam
//!
//! Relationship inference and enrichment need sentences, tokens, POS tags and
//! lemmas. They consume them through `LinguisticAnalyzer`, so any tagger can
//! be plugged in. `RuleAnalyzer` is the built-in, rule-based implementation:
//!
//! | Step      | How                                                   |
//! |-----------|-------------------------------------------------------|
//! | Sentences | Unicode sentence boundaries (`unicode-segmentation`)  |
//! | Tokens    | Word runs (letters, digits, `'`, `-`) + punctuation   |
//! | POS       | Closed-class lexicon, verb morphology, suffix rules   |
//! | Lemmas    | Verb morphology table, lowercase otherwise            |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::scanner::verb_morphology::VerbMorphology;

// =============================================================================
// Core Types
// =============================================================================

/// Part of speech tag (simplified)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PosTag {
    Noun,
    Pronoun,
    ProperNoun,
    Verb,
    Auxiliary,
    Modal,
    Adjective,
    Adverb,
    Determiner,
    Preposition,
    Conjunction,
    RelativePronoun,
    /// `'s` or a bare trailing `'`
    Possessive,
    Number,
    Punctuation,
    Other,
}

impl PosTag {
    pub fn is_nominal(&self) -> bool {
        matches!(self, PosTag::Noun | PosTag::Pronoun | PosTag::ProperNoun)
    }

    pub fn is_verbal(&self) -> bool {
        matches!(self, PosTag::Verb | PosTag::Auxiliary | PosTag::Modal)
    }

    pub fn is_modifier(&self) -> bool {
        matches!(self, PosTag::Adjective | PosTag::Adverb)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedToken {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub pos: PosTag,
    pub lemma: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedSentence {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub tokens: Vec<AnalyzedToken>,
}

impl AnalyzedSentence {
    /// Index of the first token overlapping `start..end`.
    pub fn token_index_at(&self, start: usize, end: usize) -> Option<usize> {
        self.tokens.iter().position(|t| t.start < end && start < t.end)
    }

    /// Index of the last token overlapping `start..end`.
    pub fn last_token_index_at(&self, start: usize, end: usize) -> Option<usize> {
        self.tokens.iter().rposition(|t| t.start < end && start < t.end)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub sentences: Vec<AnalyzedSentence>,
}

impl Analysis {
    /// Sentence containing byte `offset`.
    pub fn sentence_at(&self, offset: usize) -> Option<&AnalyzedSentence> {
        self.sentences.iter().find(|s| s.start <= offset && offset < s.end)
    }

    pub fn token_count(&self) -> usize {
        self.sentences.iter().map(|s| s.tokens.len()).sum()
    }
}

/// Sentence/token/POS/lemma provider.
pub trait LinguisticAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Analysis;
}

// =============================================================================
// RuleAnalyzer
// =============================================================================

#[derive(Debug, Clone)]
pub struct RuleAnalyzer {
    lexicon: HashMap<String, PosTag>,
    morphology: VerbMorphology,
}

impl Default for RuleAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl LinguisticAnalyzer for RuleAnalyzer {
    fn analyze(&self, text: &str) -> Analysis {
        let sentences = text
            .split_sentence_bound_indices()
            .filter_map(|(offset, raw)| {
                let trimmed = raw.trim_end();
                let lead = trimmed.len() - trimmed.trim_start().len();
                let body = trimmed.trim_start();
                if body.is_empty() {
                    return None;
                }
                let start = offset + lead;
                Some(AnalyzedSentence {
                    text: body.to_string(),
                    start,
                    end: start + body.len(),
                    tokens: self.tag(body, start),
                })
            })
            .collect();
        Analysis { sentences }
    }
}

impl RuleAnalyzer {
    pub fn new() -> Self {
        let mut analyzer = Self {
            lexicon: HashMap::new(),
            morphology: VerbMorphology::new(),
        };
        analyzer.load_default_lexicon();
        analyzer
    }

    pub fn morphology(&self) -> &VerbMorphology {
        &self.morphology
    }

    /// Word and punctuation ranges, relative to `text`.
    fn tokenize(text: &str) -> Vec<(usize, usize)> {
        let mut tokens = Vec::new();
        let mut start: Option<usize> = None;

        for (i, c) in text.char_indices() {
            if c.is_alphanumeric() || c == '\'' || c == '’' || c == '-' {
                if start.is_none() {
                    start = Some(i);
                }
            } else {
                if let Some(s) = start.take() {
                    Self::push_word(text, s, i, &mut tokens);
                }
                if c.is_ascii_punctuation() {
                    tokens.push((i, i + c.len_utf8()));
                }
            }
        }
        if let Some(s) = start {
            Self::push_word(text, s, text.len(), &mut tokens);
        }
        tokens
    }

    /// Split a trailing possessive off its word ("Frodo's" → "Frodo", "'s").
    fn push_word(text: &str, start: usize, end: usize, out: &mut Vec<(usize, usize)>) {
        let word = &text[start..end];
        for marker in ["'s", "'S", "’s", "’S"] {
            if word.ends_with(marker) && word.len() > marker.len() {
                let split = end - marker.len();
                out.push((start, split));
                out.push((split, end));
                return;
            }
        }
        for marker in ["'", "’"] {
            if word.ends_with(marker) && word.len() > marker.len() {
                let split = end - marker.len();
                out.push((start, split));
                out.push((split, end));
                return;
            }
        }
        out.push((start, end));
    }

    fn tag(&self, sentence: &str, base: usize) -> Vec<AnalyzedToken> {
        Self::tokenize(sentence)
            .into_iter()
            .map(|(s, e)| {
                let word = &sentence[s..e];
                let pos = self.lookup_pos(word);
                let lemma = match pos {
                    PosTag::Verb | PosTag::Auxiliary => self
                        .morphology
                        .lemma(word)
                        .map(str::to_string)
                        .unwrap_or_else(|| word.to_lowercase()),
                    _ => word.to_lowercase(),
                };
                AnalyzedToken {
                    text: word.to_string(),
                    start: base + s,
                    end: base + e,
                    pos,
                    lemma,
                }
            })
            .collect()
    }

    fn lookup_pos(&self, word: &str) -> PosTag {
        let lower = word.to_lowercase();
        if matches!(lower.as_str(), "'s" | "’s" | "'" | "’") {
            return PosTag::Possessive;
        }
        if let Some(pos) = self.lexicon.get(&lower) {
            return *pos;
        }
        if self.morphology.is_verb(&lower) {
            return PosTag::Verb;
        }
        self.infer_pos(word)
    }

    /// Heuristics for words outside the lexicon
    fn infer_pos(&self, word: &str) -> PosTag {
        let lower = word.to_lowercase();
        let first = word.chars().next();

        if word.chars().count() == 1 && first.map(|c| c.is_ascii_punctuation()).unwrap_or(false) {
            return PosTag::Punctuation;
        }
        if word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
            return PosTag::Number;
        }
        // Capitalized and not in the lexicon
        if first.map(|c| c.is_uppercase()).unwrap_or(false) {
            return PosTag::ProperNoun;
        }
        if lower.ends_with("ly") {
            return PosTag::Adverb;
        }
        if lower.ends_with("ing") || lower.ends_with("ed") {
            return PosTag::Verb;
        }
        if lower.ends_with("ful")
            || lower.ends_with("less")
            || lower.ends_with("ous")
            || lower.ends_with("ive")
            || lower.ends_with("able")
            || lower.ends_with("ible")
        {
            return PosTag::Adjective;
        }
        PosTag::Noun
    }

    fn load_default_lexicon(&mut self) {
        let groups: &[(PosTag, &[&str])] = &[
            (
                PosTag::Determiner,
                &["the", "a", "an", "this", "these", "those", "my", "your", "his", "its", "our",
                  "their", "some", "any", "no", "every", "each", "all", "both", "few", "many",
                  "much", "most", "other", "another"],
            ),
            (
                PosTag::Preposition,
                &["in", "on", "at", "to", "with", "by", "from", "of", "about", "into", "through",
                  "during", "before", "after", "above", "below", "between", "under", "over",
                  "against", "among", "around", "behind", "beside", "beyond", "near", "toward",
                  "towards", "upon", "within", "without", "across", "along", "inside", "outside",
                  "throughout", "for"],
            ),
            (
                PosTag::Auxiliary,
                &["is", "are", "was", "were", "be", "been", "being", "am", "have", "has", "had",
                  "having", "do", "does", "did", "doing"],
            ),
            (
                PosTag::Modal,
                &["can", "could", "will", "would", "shall", "should", "might", "must"],
            ),
            (
                PosTag::Conjunction,
                &["and", "or", "but", "nor", "yet", "because", "although", "while", "if",
                  "unless", "until", "since", "when", "where", "whether"],
            ),
            (
                PosTag::Pronoun,
                &["i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them",
                  "myself", "yourself", "himself", "herself", "itself", "ourselves", "themselves"],
            ),
            (PosTag::RelativePronoun, &["who", "whom", "whose", "which", "that"]),
            (
                PosTag::Adjective,
                &["old", "new", "good", "bad", "great", "small", "large", "big", "little", "young",
                  "long", "short", "high", "low", "early", "late", "first", "last", "ancient",
                  "dark", "bright", "powerful", "mighty", "wise", "evil", "grey", "black", "white",
                  "red", "blue", "green", "golden", "silver"],
            ),
            (
                PosTag::Adverb,
                &["very", "quite", "rather", "really", "too", "so", "just", "only", "now", "then",
                  "here", "there", "always", "never", "often", "sometimes", "already", "still",
                  "even", "once", "again", "soon"],
            ),
            (
                PosTag::Noun,
                &["wizard", "king", "queen", "knight", "dragon", "sword", "castle", "forest",
                  "tower", "ring", "magic", "kingdom", "throne", "warrior", "mage", "elf",
                  "dwarf", "orc", "man", "woman", "child", "hero", "villain", "stranger", "lord",
                  "lady", "brother", "sister", "father", "mother", "son", "daughter", "friend",
                  "enemy", "morning", "night", "day"],
            ),
        ];

        for (pos, words) in groups {
            for word in *words {
                self.lexicon.insert(word.to_string(), *pos);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(text: &str) -> Analysis {
        RuleAnalyzer::new().analyze(text)
    }

    // -------------------------------------------------------------------------
    // Requirement 1: Sentence segmentation with absolute offsets
    // -------------------------------------------------------------------------
    #[test]
    fn test_sentences() {
        let text = "Jon met Sam.  Sam smiled!";
        let a = analyze(text);
        assert_eq!(a.sentences.len(), 2);
        assert_eq!(a.sentences[0].text, "Jon met Sam.");
        assert_eq!(a.sentences[1].text, "Sam smiled!");
        let s = &a.sentences[1];
        assert_eq!(&text[s.start..s.end], "Sam smiled!");
        assert!(a.sentence_at(14).is_some());
    }

    // -------------------------------------------------------------------------
    // Requirement 2: Tokens carry POS and lemma
    // -------------------------------------------------------------------------
    #[test]
    fn test_pos_and_lemma() {
        let a = analyze("Jon met the old wizard in Winterfell.");
        let tokens = &a.sentences[0].tokens;
        let tags: Vec<PosTag> = tokens.iter().map(|t| t.pos).collect();
        assert_eq!(
            tags,
            vec![
                PosTag::ProperNoun,
                PosTag::Verb,
                PosTag::Determiner,
                PosTag::Adjective,
                PosTag::Noun,
                PosTag::Preposition,
                PosTag::ProperNoun,
                PosTag::Punctuation,
            ]
        );
        assert_eq!(tokens[1].lemma, "meet");
        assert_eq!(tokens[4].lemma, "wizard");
    }

    // -------------------------------------------------------------------------
    // Requirement 3: Possessives split into their own token
    // -------------------------------------------------------------------------
    #[test]
    fn test_possessive_split() {
        let text = "Frodo's ring and the Baggins' hole";
        let a = analyze(text);
        let tokens = &a.sentences[0].tokens;
        assert_eq!(tokens[0].text, "Frodo");
        assert_eq!(tokens[1].text, "'s");
        assert_eq!(tokens[1].pos, PosTag::Possessive);
        let baggins = tokens.iter().position(|t| t.text == "Baggins").unwrap();
        assert_eq!(tokens[baggins + 1].pos, PosTag::Possessive);
        assert_eq!(&text[tokens[1].start..tokens[1].end], "'s");
    }

    // -------------------------------------------------------------------------
    // Requirement 4: Token lookup by span
    // -------------------------------------------------------------------------
    #[test]
    fn test_token_index_at() {
        let a = analyze("Samwell Tarly reads books.");
        let s = &a.sentences[0];
        assert_eq!(s.token_index_at(0, 13), Some(0));
        assert_eq!(s.last_token_index_at(0, 13), Some(1));
        assert_eq!(s.token_index_at(100, 120), None);
    }

    #[test]
    fn test_empty_and_numbers() {
        assert!(analyze("").sentences.is_empty());
        assert!(analyze("   ").sentences.is_empty());
        let a = analyze("Chapter 5 began");
        assert_eq!(a.sentences[0].tokens[1].pos, PosTag::Number);
        assert_eq!(a.sentences[0].tokens[2].lemma, "begin");
        assert_eq!(a.token_count(), 3);
    }
}
