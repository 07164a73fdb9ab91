// ============================================================
// Layer 4 — Text Preprocessor
// ============================================================
// Cleans question text before feature extraction and turns
// the extractor's inline markup into formatted spans.
//
// Question text arrives from the extraction step in two shapes:
//   - already split into spans (bold / italic / underline)
//   - as one string with inline HTML-ish markup, e.g.
//       "This <b>city</b> fell in <u>1453</u>"
//
// Both end up as Vec<Span>. Anything else that looks like a tag
// (<br>, <span class=..>, <p>) is dropped; only the three
// emphasis kinds carry meaning for classification.
//
// Three text forms are derived from spans:
//   clean()                      — readable text, whitespace collapsed,
//                                  used for regex rules and entities
//   normalize_for_fingerprint()  — case folded, punctuation removed,
//                                  used for duplicate detection
//   strip_tags()                 — markup removed, nothing else
//
// Tag and entity scanning follow the usual regex approach:
//   <(/?)(name)...>   a tag, only when a letter follows '<' or '</'
//   &(name);          one of a handful of HTML entities
//
// Reference: Rust Book §8 (Strings in Rust)
//            regex crate docs (Regex::replace_all, captures_iter)

use regex::{Captures, Regex};

use crate::domain::record::Span;

/// Compile a pattern that is a literal in this crate.
/// Only fixed, tested patterns go through here; rule-data patterns are
/// compiled by the rule store and report their errors.
pub(crate) fn fixed_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern compiles")
}

pub struct Preprocessor {
    /// `<b>`, `</strong>`, `<span class="x">`; group 1 = '/', group 2 = name
    tag_re:        Regex,
    entity_re:     Regex,
    whitespace_re: Regex,
    /// Everything a fingerprint ignores: runs of non-alphanumerics
    separator_re:  Regex,
}

impl Preprocessor {
    /// Create a new Preprocessor instance
    pub fn new() -> Self {
        Self {
            tag_re:        fixed_regex(r"<(/?)([A-Za-z][A-Za-z0-9]*)[^>]*>"),
            entity_re:     fixed_regex(r"&(nbsp|lt|gt|quot|#39|apos|amp);"),
            whitespace_re: fixed_regex(r"\s+"),
            separator_re:  fixed_regex(r"[^\p{Alphabetic}\p{N}]+"),
        }
    }

    /// Clean a raw text string for downstream matching.
    ///
    /// Question text is a single paragraph, so every whitespace run
    /// (line breaks included) collapses to one space.
    pub fn clean(&self, text: &str) -> String {

        // ── Step 1: Normalise individual characters ───────────────────────────
        let step1: String = text
            .chars()
            .map(|c| match c {
                '\u{00A0}' | '\u{200B}' | '\u{FEFF}' => ' ',
                // Curly quotes and dashes from word processors
                '\u{2018}' | '\u{2019}' => '\'',
                '\u{201C}' | '\u{201D}' => '"',
                '\u{2013}' | '\u{2014}' => '-',
                c if c.is_control() => ' ',
                c => c,
            })
            .collect();

        // ── Step 2: Collapse whitespace runs ──────────────────────────────────
        self.whitespace_re.replace_all(&step1, " ").trim().to_string()
    }

    /// Turn a string with inline `<b>`, `<strong>`, `<i>`, `<em>` and `<u>`
    /// markup into spans. Unknown tags are dropped, basic entities decoded,
    /// and adjacent runs with identical formatting merged.
    pub fn parse_markup(&self, text: &str) -> Vec<Span> {
        // Open-tag depth per emphasis kind: bold, italic, underline
        let mut depth: [usize; 3] = [0; 3];
        let mut spans: Vec<Span>  = Vec::new();
        let mut buf               = String::new();
        let mut last              = 0;

        for caps in self.tag_re.captures_iter(text) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else { continue };
            buf.push_str(&text[last..whole.start()]);
            last = whole.end();

            let kind = match name.as_str().to_ascii_lowercase().as_str() {
                "b" | "strong" => 0,
                "i" | "em"     => 1,
                "u" | "ins"    => 2,
                "br" | "p"     => {
                    buf.push(' ');
                    continue;
                }
                _ => continue,
            };

            // Formatting changes here, so flush what came before it
            self.push_span(&mut spans, &buf, depth);
            buf.clear();

            if caps.get(1).is_some_and(|m| !m.is_empty()) {
                depth[kind] = depth[kind].saturating_sub(1);
            } else {
                depth[kind] += 1;
            }
        }
        buf.push_str(&text[last..]);
        self.push_span(&mut spans, &buf, depth);
        spans
    }

    /// Remove every tag and decode entities, leaving the text otherwise untouched
    pub fn strip_tags(&self, text: &str) -> String {
        let stripped = self.tag_re.replace_all(text, "");
        self.decode_entities(&stripped)
    }

    /// Fingerprint form: tags stripped, case folded, every non-alphanumeric
    /// character turned into a space, whitespace collapsed.
    ///
    /// "<b>Who</b> wrote 'Hamlet'?" and "who wrote hamlet" normalise the same.
    pub fn normalize_for_fingerprint(&self, text: &str) -> String {
        let folded = self.strip_tags(text).to_lowercase();
        self.separator_re.replace_all(&folded, " ").trim().to_string()
    }

    fn decode_entities(&self, text: &str) -> String {
        self.entity_re
            .replace_all(text, |caps: &Captures| {
                match caps.get(1).map_or("", |m| m.as_str()) {
                    "nbsp"         => " ",
                    "lt"           => "<",
                    "gt"           => ">",
                    "quot"         => "\"",
                    "#39" | "apos" => "'",
                    _              => "&",
                }
            })
            .into_owned()
    }

    fn push_span(&self, spans: &mut Vec<Span>, raw: &str, depth: [usize; 3]) {
        if raw.is_empty() {
            return;
        }
        let (bold, italic, underline) = (depth[0] > 0, depth[1] > 0, depth[2] > 0);
        let text = self.decode_entities(raw);

        if let Some(last) = spans.last_mut() {
            if last.bold == bold && last.italic == italic && last.underline == underline {
                last.text.push_str(&text);
                return;
            }
        }
        spans.push(Span { text, bold, italic, underline });
    }
}

/// Implement Default so Preprocessor can be created with Preprocessor::default()
impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_multiple_spaces() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("hello   world"), "hello world");
    }

    #[test]
    fn test_clean_joins_lines() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("  This city\n\nfell\tin 1453  "), "This city fell in 1453");
    }

    #[test]
    fn test_removes_control_chars() {
        let p = Preprocessor::new();
        assert_eq!(p.clean("hello\x01world"), "hello world");
    }

    #[test]
    fn test_empty_string() {
        let p = Preprocessor::new();
        assert_eq!(p.clean(""), "");
        assert!(p.parse_markup("").is_empty());
    }

    #[test]
    fn test_parse_markup_builds_spans() {
        let p = Preprocessor::new();
        let spans = p.parse_markup("This <b>city</b> fell in <u>1453</u>");

        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0], Span::plain("This "));
        assert_eq!(spans[1], Span::bold("city"));
        assert_eq!(spans[2], Span::plain(" fell in "));
        assert!(spans[3].underline && !spans[3].bold);
        assert_eq!(spans[3].text, "1453");
    }

    #[test]
    fn test_parse_markup_nested_and_unknown_tags() {
        let p = Preprocessor::new();
        let spans = p.parse_markup("<span class=\"q\"><strong>Rome <em>fell</em></strong></span> &amp; more");

        assert_eq!(spans[0].text, "Rome ");
        assert!(spans[0].bold && !spans[0].italic);
        assert!(spans[1].bold && spans[1].italic);
        assert_eq!(spans[2], Span::plain(" & more"));
    }

    #[test]
    fn test_less_than_is_not_a_tag() {
        let p = Preprocessor::new();
        assert_eq!(p.strip_tags("x < 5 and <i>y</i>"), "x < 5 and y");
    }

    #[test]
    fn test_uppercase_tags_and_attributes() {
        let p = Preprocessor::new();
        let spans = p.parse_markup("<B>Hagia</B> <U class=\"x\">Sophia</U><br/>church");

        assert_eq!(spans[0], Span::bold("Hagia"));
        assert_eq!(spans[1], Span::plain(" "));
        assert!(spans[2].underline);
        assert_eq!(spans[2].text, "Sophia");
        assert_eq!(spans[3], Span::plain(" church"));
    }

    #[test]
    fn test_entities_decode_once() {
        let p = Preprocessor::new();
        assert_eq!(p.strip_tags("Tom &amp; Jerry &amp;lt;3 &#39;toons&apos;"), "Tom & Jerry &lt;3 'toons'");
    }

    #[test]
    fn test_fingerprint_normalisation_ignores_case_and_punctuation() {
        let p = Preprocessor::new();
        let a = p.normalize_for_fingerprint("<b>Who</b> wrote 'Hamlet'?");
        let b = p.normalize_for_fingerprint("WHO   wrote hamlet");
        assert_eq!(a, "who wrote hamlet");
        assert_eq!(a, b);
    }
}
