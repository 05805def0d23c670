//! Text cleanup between extraction and the model call.
//!
//! Each rule is a plain function backed by a `Lazy<Regex>` so the regexes are
//! compiled once per process. Order matters: the decimal-comma repair runs
//! before the noise strip, otherwise `18,9` could lose its comma context.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_DECIMAL_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+),(\d+)").unwrap());
static RE_HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());
static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").unwrap());
static RE_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s/%()\-:.,<>*€$£¥]").unwrap());

/// Clean extracted text for the model.
///
/// * `18,9` becomes `18.9`
/// * runs of spaces/tabs collapse to one space
/// * blank-line runs collapse to a single newline
/// * symbols outside the allowed set are dropped (letters of any script,
///   digits and `/ % ( ) - : . , < > *` plus currency signs survive)
///
/// Applying it twice yields the same result as applying it once.
pub fn clean_text(raw: &str) -> String {
    let text = normalize_line_endings(raw);
    let text = strip_invisible(&text);
    let text = RE_DECIMAL_COMMA.replace_all(&text, "$1.$2");
    let text = RE_NOISE.replace_all(&text, "");
    let text = RE_HSPACE.replace_all(&text, " ");
    let text = RE_BLANK_LINES.replace_all(&text, "\n");
    text.trim().to_string()
}

fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Remove zero-width characters, soft hyphens and BOMs pdfium leaves behind.
fn strip_invisible(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '\u{200B}'..='\u{200D}' | '\u{00AD}' | '\u{FEFF}' | '\u{2060}'))
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_comma_becomes_point() {
        assert_eq!(clean_text("Zsír 18,9 g"), "Zsír 18.9 g");
        assert_eq!(clean_text("1,5,2"), "1.5,2");
    }

    #[test]
    fn whitespace_collapses() {
        assert_eq!(clean_text("a  \t b\n\n\n c"), "a b\n c");
        assert_eq!(clean_text("  padded  "), "padded");
    }

    #[test]
    fn crlf_normalised() {
        assert_eq!(clean_text("a\r\n\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn noise_symbols_removed_letters_kept() {
        assert_eq!(clean_text("Tápérték ★ 100g~"), "Tápérték 100g");
        assert_eq!(clean_text("<0.5 g* (20%)"), "<0.5 g* (20%)");
        assert_eq!(clean_text("Energie: 1520 kJ/364 kcal"), "Energie: 1520 kJ/364 kcal");
    }

    #[test]
    fn invisible_chars_dropped() {
        assert_eq!(clean_text("so\u{00AD}dium\u{200B}"), "sodium");
        assert_eq!(clean_text("10\u{00A0}g"), "10 g");
    }

    #[test]
    fn idempotent() {
        let raw = "Nutrition  facts\n\n Fat 3,4 g ★\r\n Salt 1,2g";
        let once = clean_text(raw);
        assert_eq!(clean_text(&once), once);
    }
}
