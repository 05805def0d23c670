//! Language detection on the cleaned text using `whatlang`.
//!
//! The result is reported in metadata and passed to the model as a hint; it
//! never selects an OCR model (OCR runs before any text exists).

use tracing::debug;
use whatlang::{detect, Lang};

/// Code returned when the text is too short or detection is inconclusive.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Below this many non-whitespace characters trigram detection is noise.
const MIN_DETECT_CHARS: usize = 10;

/// whatlang confidence a guess must reach before it is reported.
///
/// Nutrition tables are mostly numbers, units and short nutrient names, which
/// whatlang scores poorly; an unsure guess is worse than the default.
pub const MIN_CONFIDENCE: f64 = 0.5;

/// Detect the dominant language and return a two-letter code.
///
/// Languages common on EU food labels map to ISO 639-1; anything else falls
/// back to whatlang's three-letter code. Guesses below [`MIN_CONFIDENCE`]
/// yield [`DEFAULT_LANGUAGE`].
pub fn detect_language(text: &str) -> String {
    let significant = text.chars().filter(|c| !c.is_whitespace()).count();
    if significant < MIN_DETECT_CHARS {
        return DEFAULT_LANGUAGE.to_string();
    }

    match detect(text) {
        Some(info) if info.confidence() >= MIN_CONFIDENCE => {
            debug!(
                lang = info.lang().code(),
                confidence = info.confidence(),
                "Detected language"
            );
            lang_to_code(info.lang()).to_string()
        }
        Some(info) => {
            debug!(
                lang = info.lang().code(),
                confidence = info.confidence(),
                "Language guess below confidence threshold; using default"
            );
            DEFAULT_LANGUAGE.to_string()
        }
        None => DEFAULT_LANGUAGE.to_string(),
    }
}

fn lang_to_code(lang: Lang) -> &'static str {
    match lang {
        Lang::Hun => "hu",
        Lang::Eng => "en",
        Lang::Deu => "de",
        Lang::Fra => "fr",
        Lang::Spa => "es",
        Lang::Ita => "it",
        Lang::Ron => "ro",
        Lang::Slk => "sk",
        Lang::Ces => "cs",
        Lang::Pol => "pl",
        Lang::Nld => "nl",
        Lang::Por => "pt",
        Lang::Hrv => "hr",
        Lang::Slv => "sl",
        other => other.code(),
    }
}

/// English name for a two-letter code, used in the model prompt.
pub fn language_name(code: &str) -> &'static str {
    match code {
        "hu" => "Hungarian",
        "en" => "English",
        "de" => "German",
        "fr" => "French",
        "es" => "Spanish",
        "it" => "Italian",
        "ro" => "Romanian",
        "sk" => "Slovak",
        "cs" => "Czech",
        "pl" => "Polish",
        "nl" => "Dutch",
        "pt" => "Portuguese",
        "hr" => "Croatian",
        "sl" => "Slovenian",
        _ => "unknown",
    }
}
