//! Verb Morphology - inflection table and lemmatisation
//!
//! Base verbs are stored with a conjugation pattern; every inflected form is
//! generated once at construction and mapped back to its base, so both
//! "is this a verb?" and "what is its lemma?" are single hash lookups.
//!
//! ```rust
//! use kittscan::VerbMorphology;
//!
//! let morphology = VerbMorphology::default();
//! assert_eq!(morphology.lemma("met"), Some("meet"));
//! assert_eq!(morphology.lemma("carries"), Some("carry"));
//! assert!(morphology.lemma("wizard").is_none());
//! ```

use std::collections::HashMap;

// =============================================================================
// Core Types
// =============================================================================

/// Conjugation pattern for English verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbPattern {
    /// walk → walks, walked, walking
    Regular,
    /// love → loves, loved, loving
    RegularE,
    /// stop → stops, stopped, stopping
    DoubleConsonant,
    /// carry → carries, carried, carrying
    YToI,
    Irregular {
        past: &'static str,
        past_participle: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct VerbEntry {
    pub base: &'static str,
    pub pattern: VerbPattern,
}

impl VerbEntry {
    pub const fn regular(base: &'static str) -> Self {
        Self { base, pattern: VerbPattern::Regular }
    }

    pub const fn e_ending(base: &'static str) -> Self {
        Self { base, pattern: VerbPattern::RegularE }
    }

    pub const fn double_consonant(base: &'static str) -> Self {
        Self { base, pattern: VerbPattern::DoubleConsonant }
    }

    pub const fn y_to_i(base: &'static str) -> Self {
        Self { base, pattern: VerbPattern::YToI }
    }

    pub const fn irregular(base: &'static str, past: &'static str, past_participle: &'static str) -> Self {
        Self { base, pattern: VerbPattern::Irregular { past, past_participle } }
    }

    /// Base form first, then 3rd singular, past, present participle and
    /// (irregular only) a distinct past participle.
    pub fn inflections(&self) -> Vec<String> {
        let base = self.base;

        match &self.pattern {
            VerbPattern::Regular => vec![
                base.to_string(),
                third_person_singular(base),
                format!("{}ed", base),
                format!("{}ing", base),
            ],
            VerbPattern::RegularE => {
                let stem = base.strip_suffix('e').unwrap_or(base);
                vec![
                    base.to_string(),
                    format!("{}s", base),
                    format!("{}d", base),
                    format!("{}ing", stem),
                ]
            }
            VerbPattern::DoubleConsonant => {
                let last = base.chars().last().map(String::from).unwrap_or_default();
                vec![
                    base.to_string(),
                    format!("{}s", base),
                    format!("{}{}ed", base, last),
                    format!("{}{}ing", base, last),
                ]
            }
            VerbPattern::YToI => {
                let stem = base.strip_suffix('y').unwrap_or(base);
                vec![
                    base.to_string(),
                    format!("{}ies", stem),
                    format!("{}ied", stem),
                    format!("{}ying", stem),
                ]
            }
            VerbPattern::Irregular { past, past_participle } => {
                let mut forms = vec![
                    base.to_string(),
                    third_person_singular(base),
                    past.to_string(),
                    present_participle(base),
                ];
                if past != past_participle {
                    forms.push(past_participle.to_string());
                }
                forms
            }
        }
    }
}

fn third_person_singular(base: &str) -> String {
    let sibilant = ["s", "x", "z", "sh", "ch", "o"].iter().any(|s| base.ends_with(s));
    let consonant_y = base.ends_with('y') && !["ay", "ey", "oy", "uy"].iter().any(|s| base.ends_with(s));
    if sibilant {
        format!("{}es", base)
    } else if consonant_y {
        format!("{}ies", &base[..base.len() - 1])
    } else {
        format!("{}s", base)
    }
}

fn present_participle(base: &str) -> String {
    match base {
        "die" => "dying".to_string(),
        "lie" => "lying".to_string(),
        _ if base.ends_with('e') && !base.ends_with("ee") && base.len() > 2 => {
            format!("{}ing", &base[..base.len() - 1])
        }
        "run" | "win" | "get" | "set" | "sit" | "hit" | "begin" => format!("{}{}ing", base, &base[base.len() - 1..]),
        _ => format!("{}ing", base),
    }
}

// =============================================================================
// Verb Table
// =============================================================================

const VERB_TABLE: &[VerbEntry] = &[
    // Social / interaction
    VerbEntry::irregular("meet", "met", "met"),
    VerbEntry::regular("greet"),
    VerbEntry::regular("join"),
    VerbEntry::e_ending("serve"),
    VerbEntry::regular("help"),
    VerbEntry::regular("follow"),
    VerbEntry::regular("visit"),
    VerbEntry::y_to_i("accompany"),
    // Relationships
    VerbEntry::e_ending("love"),
    VerbEntry::e_ending("hate"),
    VerbEntry::y_to_i("marry"),
    VerbEntry::regular("befriend"),
    VerbEntry::regular("betray"),
    VerbEntry::regular("trust"),
    VerbEntry::e_ending("admire"),
    VerbEntry::e_ending("despise"),
    // Leadership / authority
    VerbEntry::irregular("lead", "led", "led"),
    VerbEntry::regular("command"),
    VerbEntry::e_ending("rule"),
    VerbEntry::regular("govern"),
    VerbEntry::double_consonant("control"),
    // Mentorship
    VerbEntry::irregular("teach", "taught", "taught"),
    VerbEntry::regular("mentor"),
    VerbEntry::regular("train"),
    VerbEntry::e_ending("guide"),
    // Protection
    VerbEntry::regular("guard"),
    VerbEntry::regular("protect"),
    VerbEntry::regular("defend"),
    VerbEntry::e_ending("rescue"),
    VerbEntry::e_ending("save"),
    // Possession
    VerbEntry::irregular("hold", "held", "held"),
    VerbEntry::regular("own"),
    VerbEntry::regular("possess"),
    VerbEntry::irregular("keep", "kept", "kept"),
    VerbEntry::regular("wield"),
    VerbEntry::y_to_i("carry"),
    // Conflict
    VerbEntry::irregular("fight", "fought", "fought"),
    VerbEntry::regular("defeat"),
    VerbEntry::regular("kill"),
    VerbEntry::regular("attack"),
    VerbEntry::e_ending("battle"),
    VerbEntry::regular("destroy"),
    VerbEntry::regular("conquer"),
    VerbEntry::regular("betroth"),
    VerbEntry::e_ending("oppose"),
    // Movement
    VerbEntry::irregular("go", "went", "gone"),
    VerbEntry::irregular("come", "came", "come"),
    VerbEntry::irregular("run", "ran", "run"),
    VerbEntry::regular("walk"),
    VerbEntry::e_ending("move"),
    VerbEntry::irregular("fly", "flew", "flown"),
    VerbEntry::regular("travel"),
    VerbEntry::e_ending("arrive"),
    VerbEntry::regular("return"),
    VerbEntry::irregular("flee", "fled", "fled"),
    VerbEntry::regular("enter"),
    VerbEntry::e_ending("leave"),
    // Communication
    VerbEntry::irregular("say", "said", "said"),
    VerbEntry::irregular("tell", "told", "told"),
    VerbEntry::irregular("speak", "spoke", "spoken"),
    VerbEntry::regular("talk"),
    VerbEntry::regular("ask"),
    VerbEntry::regular("answer"),
    VerbEntry::regular("call"),
    VerbEntry::regular("warn"),
    // Cognition / perception
    VerbEntry::irregular("know", "knew", "known"),
    VerbEntry::irregular("think", "thought", "thought"),
    VerbEntry::irregular("see", "saw", "seen"),
    VerbEntry::irregular("hear", "heard", "heard"),
    VerbEntry::e_ending("believe"),
    VerbEntry::regular("remember"),
    VerbEntry::e_ending("recognize"),
    // Creation
    VerbEntry::irregular("make", "made", "made"),
    VerbEntry::e_ending("create"),
    VerbEntry::irregular("build", "built", "built"),
    VerbEntry::irregular("write", "wrote", "written"),
    VerbEntry::e_ending("forge"),
    VerbEntry::regular("found"),
    // State / existence
    VerbEntry::e_ending("live"),
    VerbEntry::irregular("die", "died", "died"),
    VerbEntry::regular("remain"),
    VerbEntry::irregular("become", "became", "become"),
    VerbEntry::irregular("begin", "began", "begun"),
    VerbEntry::regular("end"),
    // Transfer
    VerbEntry::irregular("get", "got", "gotten"),
    VerbEntry::irregular("take", "took", "taken"),
    VerbEntry::irregular("give", "gave", "given"),
    VerbEntry::irregular("find", "found", "found"),
    VerbEntry::irregular("lose", "lost", "lost"),
    VerbEntry::irregular("steal", "stole", "stolen"),
    VerbEntry::irregular("send", "sent", "sent"),
    VerbEntry::e_ending("receive"),
    VerbEntry::irregular("bring", "brought", "brought"),
    // Emotion
    VerbEntry::regular("want"),
    VerbEntry::regular("need"),
    VerbEntry::regular("fear"),
    VerbEntry::regular("enjoy"),
];

/// Forms the pattern table cannot express
const SPECIAL_FORMS: &[(&str, &str)] = &[
    ("am", "be"), ("is", "be"), ("are", "be"), ("was", "be"), ("were", "be"),
    ("be", "be"), ("been", "be"), ("being", "be"),
    ("have", "have"), ("has", "have"), ("had", "have"), ("having", "have"),
    ("do", "do"), ("does", "do"), ("did", "do"), ("done", "do"), ("doing", "do"),
];

// =============================================================================
// VerbMorphology
// =============================================================================

/// Inflected form → base form lookup
#[derive(Debug, Clone)]
pub struct VerbMorphology {
    /// lowercase form → lowercase lemma
    forms: HashMap<String, String>,
}

impl Default for VerbMorphology {
    fn default() -> Self {
        Self::new()
    }
}

impl VerbMorphology {
    pub fn new() -> Self {
        let mut morphology = Self { forms: HashMap::new() };
        for entry in VERB_TABLE {
            morphology.add_verb(entry);
        }
        for (form, lemma) in SPECIAL_FORMS {
            morphology.forms.insert(form.to_string(), lemma.to_string());
        }
        morphology
    }

    /// Add a verb at runtime. Existing forms keep their first lemma.
    pub fn add_verb(&mut self, entry: &VerbEntry) {
        for form in entry.inflections() {
            self.forms
                .entry(form.to_lowercase())
                .or_insert_with(|| entry.base.to_lowercase());
        }
    }

    pub fn is_verb(&self, word: &str) -> bool {
        self.forms.contains_key(&word.to_lowercase())
    }

    pub fn lemma(&self, word: &str) -> Option<&str> {
        self.forms.get(&word.to_lowercase()).map(String::as_str)
    }

    pub fn form_count(&self) -> usize {
        self.forms.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
