// ============================================================
// Layer 4 — Feature Extractor
// ============================================================
// Turns a record's formatted text into the feature bag every
// axis classifier reads. The bag is computed once per record
// and never changes afterwards.
//
//   question spans + answer spans
//       │
//       ▼
//   Preprocessor::clean      → readable text (regex rules)
//       │
//       ├── tokenize         → lower-cased tokens + counts
//       ├── detect_dates     → years, BC years, decades,
//       │                      ordinal centuries (one regex),
//       │                      era names from the rule data
//       ├── entity runs      → capitalised multi-word names
//       └── emphasis runs    → bold / italic / underlined spans
//
// Extraction reads only text and formatting. Labels, flags and
// confidences are ignored, which is what makes re-classifying a
// classified record produce the same result.
//
// Reference: Rust Book §8 (Collections), §13 (Iterators)

use std::collections::BTreeMap;

use regex::{Captures, Regex};

use crate::data::preprocessor::{fixed_regex, Preprocessor};
use crate::domain::record::{join_spans, QuestionRecord, Span};
use crate::domain::rule::EraName;

// ─── Constants ────────────────────────────────────────────────────────────────

/// Plain four-digit numbers in this range are read as years
const MIN_BARE_YEAR: i32 = 1000;
const MAX_BARE_YEAR: i32 = 2029;

/// Lower-case words allowed inside a capitalised name ("Treaty of Versailles")
const NAME_CONNECTORS: &[&str] = &["of", "the", "de", "la", "von", "van", "and", "du", "del"];

const ORDINAL_WORDS: &[(&str, i32)] = &[
    ("first", 1), ("second", 2), ("third", 3), ("fourth", 4), ("fifth", 5),
    ("sixth", 6), ("seventh", 7), ("eighth", 8), ("ninth", 9), ("tenth", 10),
    ("eleventh", 11), ("twelfth", 12), ("thirteenth", 13), ("fourteenth", 14),
    ("fifteenth", 15), ("sixteenth", 16), ("seventeenth", 17), ("eighteenth", 18),
    ("nineteenth", 19), ("twentieth", 20),
];

// ─── Feature types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DateKind {
    Year,
    Decade,
    Century,
    EraName,
}

/// A detected date expression as an inclusive year range (BCE negative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateExpr {
    pub from: i32,
    pub to:   i32,
    pub kind: DateKind,
}

impl DateExpr {
    fn new(from: i32, to: i32, kind: DateKind) -> Self {
        Self { from, to, kind }
    }

    pub fn overlaps(&self, from: i32, to: i32) -> bool {
        self.from <= to && from <= self.to
    }
}

/// A contiguous stretch of text with its tokens: an emphasised span,
/// or a capitalised multi-word name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermRun {
    /// Original text, cleaned but with casing kept
    pub text:   String,
    pub tokens: Vec<String>,
    pub dates:  Vec<DateExpr>,
}

/// Everything the classifiers are allowed to look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureBag {
    /// Cleaned question text, then the answer line
    pub text:         String,
    /// Lower-cased tokens in reading order
    pub tokens:       Vec<String>,
    pub token_counts: BTreeMap<String, usize>,
    pub dates:        Vec<DateExpr>,
    pub proper_nouns: Vec<TermRun>,
    pub emphasized:   Vec<TermRun>,
}

impl FeatureBag {
    /// True when `needle` occurs as consecutive tokens
    pub fn contains_sequence(&self, needle: &[String]) -> bool {
        if needle.len() == 1 {
            return self.token_counts.contains_key(&needle[0]);
        }
        contains_sequence(&self.tokens, needle)
    }

    pub fn emphasis_contains(&self, needle: &[String]) -> bool {
        self.emphasized.iter().any(|run| contains_sequence(&run.tokens, needle))
    }

    pub fn entity_contains(&self, needle: &[String]) -> bool {
        self.proper_nouns.iter().any(|run| contains_sequence(&run.tokens, needle))
    }

    pub fn any_date_overlaps(&self, from: i32, to: i32) -> bool {
        self.dates.iter().any(|d| d.overlaps(from, to))
    }

    pub fn emphasized_date_overlaps(&self, from: i32, to: i32) -> bool {
        self.emphasized.iter().flat_map(|r| r.dates.iter()).any(|d| d.overlaps(from, to))
    }
}

pub fn contains_sequence(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Split text into lower-cased alphanumeric tokens.
/// The same function compiles keyword and phrase rules, so rule text and
/// record text are always tokenised identically.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

// ─── FeatureExtractor ─────────────────────────────────────────────────────────

struct CompiledEraName {
    tokens: Vec<String>,
    from:   i32,
    to:     i32,
}

/// Builds feature bags. Holds the era names from the rule set, so one
/// extractor belongs to one rule-set snapshot.
pub struct FeatureExtractor {
    preprocessor: Preprocessor,
    era_names:    Vec<CompiledEraName>,
    date_re:      Regex,
}

impl FeatureExtractor {
    pub fn new(era_names: &[EraName]) -> Self {
        let era_names = era_names
            .iter()
            .map(|e| CompiledEraName { tokens: tokenize(&e.name), from: e.from, to: e.to })
            .filter(|e| !e.tokens.is_empty())
            .collect();

        Self { preprocessor: Preprocessor::new(), era_names, date_re: date_regex() }
    }

    /// Extract features from the question text and answer line of a record
    pub fn extract(&self, record: &QuestionRecord) -> FeatureBag {
        self.extract_spans(&record.text, &record.answer)
    }

    pub fn extract_spans(&self, question: &[Span], answer: &[Span]) -> FeatureBag {
        let mut bag = FeatureBag::default();

        // ── Step 1: Readable text per part ────────────────────────────────────
        let parts: Vec<String> = [question, answer]
            .iter()
            .map(|spans| self.preprocessor.clean(&join_spans(spans)))
            .filter(|t| !t.is_empty())
            .collect();
        bag.text = parts.join(" ");

        // ── Step 2: Tokens, counts and dates ──────────────────────────────────
        for part in &parts {
            bag.tokens.extend(tokenize(part));
        }
        for token in &bag.tokens {
            *bag.token_counts.entry(token.clone()).or_insert(0) += 1;
        }
        bag.dates = self.detect_dates(&bag.tokens);

        // ── Step 3: Capitalised names, never across the question/answer gap ───
        for part in &parts {
            bag.proper_nouns.extend(entity_runs(part));
        }

        // ── Step 4: Emphasised spans ──────────────────────────────────────────
        for span in question.iter().chain(answer.iter()) {
            if !span.is_emphasized() {
                continue;
            }
            let text = self.preprocessor.clean(&span.text);
            let tokens = tokenize(&text);
            if tokens.is_empty() {
                continue;
            }
            let dates = self.detect_dates(&tokens);
            bag.emphasized.push(TermRun { text, tokens, dates });
        }

        bag
    }

    /// Find every date expression in a token sequence, in reading order.
    pub fn detect_dates(&self, tokens: &[String]) -> Vec<DateExpr> {

        // ── Step 1: Tokens as one space-separated string ──────────────────────
        let mut joined = String::new();
        let mut starts = Vec::with_capacity(tokens.len());
        for token in tokens {
            if !joined.is_empty() {
                joined.push(' ');
            }
            starts.push(joined.len());
            joined.push_str(token);
        }

        // ── Step 2: Fixed date forms, keyed by their first token ──────────────
        let mut fixed: BTreeMap<usize, (usize, DateExpr)> = BTreeMap::new();
        for caps in self.date_re.captures_iter(&joined) {
            let Some(whole) = caps.get(0) else { continue };
            let Ok(first) = starts.binary_search(&whole.start()) else { continue };
            if let Some(expr) = date_from(&caps) {
                fixed.insert(first, (whole.as_str().split(' ').count(), expr));
            }
        }

        // ── Step 3: Walk tokens; era names fill the gaps ──────────────────────
        let mut dates = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            if let Some(&(used, expr)) = fixed.get(&i) {
                dates.push(expr);
                i += used;
                continue;
            }
            if let Some(era) = self.era_names.iter().find(|e| tokens[i..].starts_with(&e.tokens)) {
                dates.push(DateExpr::new(era.from, era.to, DateKind::EraName));
                i += era.tokens.len();
                continue;
            }
            i += 1;
        }
        dates
    }
}

// ─── Date helpers ─────────────────────────────────────────────────────────────

/// One regex over lower-cased tokens joined by single spaces.
/// Alternatives are tried in order at each position:
///   "15th century", "twenty first century", "fifth century b c"
///   "1960s"
///   "44 bc", "31 b c e"
///   "1453 ad", "476 a d", "ad 476"
///   "1453"
fn date_regex() -> Regex {
    let words: Vec<&str> = ORDINAL_WORDS.iter().map(|(w, _)| *w).collect();
    let units: Vec<&str> = ORDINAL_WORDS.iter().filter(|(_, n)| *n < 10).map(|(w, _)| *w).collect();
    let bc = r"(?:bce|bc|b\ c\ e|b\ c)";

    fixed_regex(&format!(
        r"(?x)
        \b(?:
            (?P<ordinal>[0-9]{{1,2}}(?:st|nd|rd|th)|twenty\ (?:{units})|{words})
                \ centur(?:y|ies)
                (?P<century_bc>\ {bc})?
          | (?P<decade>[0-9]{{4}})s
          | (?P<bc_year>[0-9]{{1,4}})\ {bc}
          | (?P<ad_year>[0-9]{{1,4}})\ (?:ad|ce|a\ d)
          | (?:ad|ce)\ (?P<ad_lead>[0-9]{{1,4}})
          | (?P<year>[0-9]{{4}})
        )\b",
        units = units.join("|"),
        words = words.join("|"),
    ))
}

/// Turn one match of the date regex into a year range. `None` when the
/// numbers are out of range ("0th century", "2150", "1453s").
fn date_from(caps: &Captures<'_>) -> Option<DateExpr> {
    let number = |name: &str| caps.name(name).and_then(|m| m.as_str().parse::<i32>().ok());

    if let Some(ordinal) = caps.name("ordinal") {
        let n = ordinal_value(ordinal.as_str())?;
        return Some(if caps.name("century_bc").is_some() {
            DateExpr::new(-(n * 100), -((n - 1) * 100 + 1), DateKind::Century)
        } else {
            DateExpr::new((n - 1) * 100, n * 100 - 1, DateKind::Century)
        });
    }
    if let Some(n) = number("decade") {
        if !(MIN_BARE_YEAR..=MAX_BARE_YEAR).contains(&n) || n % 10 != 0 {
            return None;
        }
        // "1800s" reads as a century, "1960s" as a decade
        let width = if n % 100 == 0 { 99 } else { 9 };
        return Some(DateExpr::new(n, n + width, DateKind::Decade));
    }
    if let Some(n) = number("bc_year") {
        return (n > 0).then(|| DateExpr::new(-n, -n, DateKind::Year));
    }
    if let Some(n) = number("ad_year").or_else(|| number("ad_lead")) {
        return (n > 0).then(|| DateExpr::new(n, n, DateKind::Year));
    }
    number("year")
        .filter(|n| (MIN_BARE_YEAR..=MAX_BARE_YEAR).contains(n))
        .map(|n| DateExpr::new(n, n, DateKind::Year))
}

/// "15th" → 15, "fifteenth" → 15, "twenty first" → 21
fn ordinal_value(text: &str) -> Option<i32> {
    let word = |t: &str| ORDINAL_WORDS.iter().find(|(w, _)| *w == t).map(|(_, n)| *n);

    if let Some(unit) = text.strip_prefix("twenty ") {
        return word(unit).map(|n| 20 + n);
    }
    if let Some(n) = word(text) {
        return Some(n);
    }
    let digits = text.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    digits.parse::<i32>().ok().filter(|n| *n > 0)
}

// ─── Entity helpers ───────────────────────────────────────────────────────────

/// Capitalised multi-word sequences ("Holy Roman Empire", "Treaty of Paris").
/// Punctuation between words ends a sequence; connectors may sit inside one
/// but never at its edges.
fn entity_runs(text: &str) -> Vec<TermRun> {
    let mut runs    = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for (word, broken) in words_with_breaks(text) {
        if broken {
            flush_run(&mut current, &mut runs);
        }
        if is_capitalised(word) {
            current.push(word);
        } else if is_connector(word) && !current.is_empty() {
            current.push(word);
        } else {
            flush_run(&mut current, &mut runs);
        }
    }
    flush_run(&mut current, &mut runs);
    runs
}

fn flush_run(current: &mut Vec<&str>, runs: &mut Vec<TermRun>) {
    while current.last().is_some_and(|w| is_connector(w)) {
        current.pop();
    }
    let capitalised = current.iter().filter(|w| is_capitalised(w)).count();
    if capitalised >= 2 {
        let text   = current.join(" ");
        let tokens = tokenize(&text);
        runs.push(TermRun { text, tokens, dates: Vec::new() });
    }
    current.clear();
}

fn is_capitalised(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

fn is_connector(word: &str) -> bool {
    NAME_CONNECTORS.contains(&word)
}

/// Words with a flag telling whether punctuation (not just whitespace)
/// separated them from the previous word.
fn words_with_breaks(text: &str) -> Vec<(&str, bool)> {
    let mut out   = Vec::new();
    let mut start = None;
    let mut broken = false;

    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() {
            if start.is_none() {
                start = Some(i);
            }
        } else {
            if let Some(s) = start.take() {
                out.push((&text[s..i], broken));
                broken = false;
            }
            if !c.is_whitespace() {
                broken = true;
            }
        }
    }
    if let Some(s) = start {
        out.push((&text[s..], broken));
    }
    out
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::{Difficulty, Provenance};

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(&[EraName { name: "Victorian".into(), from: 1837, to: 1901 }])
    }

    fn years(bag: &FeatureBag) -> Vec<(i32, i32)> {
        bag.dates.iter().map(|d| (d.from, d.to)).collect()
    }

    fn bag(text: &str) -> FeatureBag {
        extractor().extract_spans(&[Span::plain(text)], &[])
    }

    #[test]
    fn test_tokenize_lowercases_and_splits_punctuation() {
        assert_eq!(tokenize("Who's the U.S. President?"), vec!["who", "s", "the", "u", "s", "president"]);
    }

    #[test]
    fn test_detects_bare_and_bc_years() {
        let b = bag("Constantinople fell in 1453, long after 44 BC and 31 B.C.E.");
        assert_eq!(years(&b), vec![(1453, 1453), (-44, -44), (-31, -31)]);
    }

    #[test]
    fn test_small_numbers_are_not_years() {
        let b = bag("He had 300 soldiers and 12 ships");
        assert!(b.dates.is_empty());
    }

    #[test]
    fn test_detects_ad_years_and_centuries() {
        let b = bag("In AD 476 Rome fell; the fifth century BC and the 15th century differ");
        assert_eq!(years(&b), vec![(476, 476), (-500, -401), (1400, 1499)]);
    }

    #[test]
    fn test_detects_decades_and_era_names() {
        let b = bag("Victorian novels of the 1860s and the 1800s");
        assert_eq!(years(&b), vec![(1837, 1901), (1860, 1869), (1800, 1899)]);
        assert_eq!(b.dates[0].kind, DateKind::EraName);
    }

    #[test]
    fn test_trailing_ad_markers_and_out_of_range_numbers() {
        let b = bag("Crowned in 800 A.D., built 1453 AD; not 2150, not 0th century, not 1453s");
        assert_eq!(years(&b), vec![(800, 800), (1453, 1453)]);
    }

    #[test]
    fn test_centuries_plural_and_bc_markers() {
        let b = bag("in the 4th and 5th centuries; the first century b.c.");
        assert_eq!(years(&b), vec![(400, 499), (-100, -1)]);
    }

    #[test]
    fn test_twenty_first_century() {
        let b = bag("a twenty-first century invention");
        assert_eq!(years(&b), vec![(2000, 2099)]);
    }

    #[test]
    fn test_entity_runs_respect_connectors_and_punctuation() {
        let b = bag("The Treaty of Versailles ended it. Paris, France hosted.");
        let names: Vec<&str> = b.proper_nouns.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(names, vec!["The Treaty of Versailles"]);
    }

    #[test]
    fn test_emphasis_runs_come_from_formatted_spans() {
        let b = extractor().extract_spans(
            &[Span::plain("This city fell in "), Span::bold("1453")],
            &[Span { text: "Constantinople".into(), underline: true, ..Span::plain("") }],
        );
        assert_eq!(b.emphasized.len(), 2);
        assert!(b.emphasized_date_overlaps(1450, 1460));
        assert!(b.emphasis_contains(&["constantinople".to_string()]));
        assert_eq!(b.text, "This city fell in 1453 Constantinople");
    }

    #[test]
    fn test_extraction_ignores_labels() {
        let record = QuestionRecord::new(
            "q1",
            vec![Span::plain("Constantinople fell in 1453.")],
            Difficulty::Finals,
            Provenance::new("doc", 0),
        );
        let mut labelled = record.clone();
        labelled.region = "Europe".into();

        let x = extractor();
        assert_eq!(x.extract(&record), x.extract(&labelled));
    }

    #[test]
    fn test_phrase_lookup_uses_consecutive_tokens() {
        let b = bag("the holy roman empire");
        let phrase = tokenize("Holy Roman Empire");
        assert!(b.contains_sequence(&phrase));
        assert!(!b.contains_sequence(&tokenize("roman holy")));
    }
}
