//! Prompts for structured nutrition/allergen extraction.
//!
//! Every prompt lives here so a wording change touches one file and the unit
//! tests below catch accidental schema drift. Callers can replace the system
//! prompt via [`crate::config::AnalysisConfig::system_prompt`].

/// System prompt shared by the text and vision paths.
///
/// The JSON keys match [`crate::schema::NutrientKey`] and
/// [`crate::schema::AllergenKey`] so the validator rarely needs its alias
/// tables on a well-behaved model.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You extract nutrition facts and allergen information from food product specification documents. Documents may be in Hungarian, English, German, French or another European language.

Return ONLY a JSON object with exactly this shape:

{
  "nutrition": {
    "energy":       {"per_100g": "<number or null>", "unit": "kJ"},
    "fat":          {"per_100g": "<number or null>", "unit": "g"},
    "carbohydrate": {"per_100g": "<number or null>", "unit": "g"},
    "sugar":        {"per_100g": "<number or null>", "unit": "g"},
    "protein":      {"per_100g": "<number or null>", "unit": "g"},
    "sodium":       {"per_100g": "<number or null>", "unit": "g"},
    "salt":         {"per_100g": "<number or null>", "unit": "g"}
  },
  "allergens": {
    "gluten": false, "egg": false, "crustacean": false, "fish": false, "peanut": false,
    "soy": false, "milk": false, "nuts": false, "celery": false, "mustard": false
  }
}

Rules:
1. Values are per 100 g (or 100 ml). Ignore per-portion columns and %RI columns.
2. Copy numbers exactly as printed. Use a dot as the decimal separator. Do not convert units.
3. For energy prefer kJ; use kcal only when kJ is not printed.
4. If a value is not printed, use null. Never guess.
5. Report salt exactly as printed; do not compute sodium yourself.
6. An allergen is true only if the document states the product contains it (ingredient list, bold allergens, "contains" statements). "May contain traces" is false.
7. Output the JSON object only: no explanations, no Markdown."#;

/// Prompt appended to the page images on the visual path.
pub const VISION_INSTRUCTIONS: &str = "The attached images are pages of the same product \
specification. Read the nutrition table and the ingredient/allergen statements directly from \
the images and return the JSON object described above.";

/// Build the user message for the text path.
///
/// With an excerpt the model gets the full document for allergens and the
/// excerpt for the nutrition table; without one it gets the document alone.
pub fn build_text_prompt(
    text: &str,
    excerpt: Option<&str>,
    language_name: &str,
    page_count: usize,
    ocr_used: bool,
) -> String {
    let source = if ocr_used { "OCR (may contain misread characters)" } else { "embedded PDF text" };
    let header = format!(
        "Document language: {language_name}. Pages: {page_count}. Text source: {source}."
    );

    match excerpt {
        Some(excerpt) => format!(
            "{header}\n\n\
             FULL DOCUMENT (use for allergens and context):\n{text}\n\n\
             NUTRITION TABLE (use for nutrient values):\n{excerpt}\n\n\
             Extract the nutrients from the NUTRITION TABLE section and the allergens from the \
             FULL DOCUMENT. Return only the JSON."
        ),
        None => format!(
            "{header}\n\n\
             DOCUMENT:\n{text}\n\n\
             Extract the data in the format shown above. Return only the JSON."
        ),
    }
}
