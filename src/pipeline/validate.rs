//! Result validation: untyped model JSON in, strictly-typed tables out.
//!
//! The validator is total: any JSON value produces a complete result, with
//! every nutrient and allergen present. Anything it had to invent is listed
//! in [`NormalizedExtraction::defaulted_fields`] instead of failing the
//! request. Running it on its own serialised output changes nothing.
//!
//! Rules, in order:
//! 1. nutrient entries are looked up through the alias table and their
//!    amounts normalised (`6,9 g` → `6.9`, `n/a` → null, negatives → `0`)
//! 2. energy at or below zero is dropped
//! 3. a missing unit is inferred from a unit suffix on the amount
//! 4. allergen values of any shape coerce to strict booleans
//! 5. sodium is derived from salt (`× 0.4`, in grams) when not stated

use crate::output::{AllergenFlags, NutrientValue, NutritionTable, RawExtraction};
use crate::schema::{
    entry_amount, entry_unit, find_container, fold_key, nutrient_entry, AllergenKey, NutrientKey,
    ALLERGEN_CONTAINERS, NUTRITION_CONTAINERS, SALT_ALIASES,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Sodium is 40 % of salt by mass.
pub const SODIUM_PER_SALT: f64 = 0.4;

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?(?:\d+(?:\.\d+)?|\.\d+)").unwrap());
static RE_DECIMAL_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+),(\d+)").unwrap());
static RE_UNIT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\d\s*(kj|kcal|mg|µg|mcg|g)\b").unwrap());
static RE_SALT_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:salt|só|salz|sel)\b\s*[:=]?\s*(\d+(?:[.,]\d+)?)(?:\s*(mg|µg|mcg|g)\b)?").unwrap()
});

/// Amount strings that mean "not stated".
const NO_DATA_EXACT: &[&str] = &["-", "–", "—", "na", "n/a", "n.a.", "null", "none", "nincs", "x"];
const NO_DATA_PHRASES: &[&str] = &["nincs adat", "not available", "keine angabe", "non disponible"];

/// Strings that coerce to `true` for an allergen flag, compared after [`fold_key`].
const TRUTHY: &[&str] = &[
    "true", "yes", "y", "igen", "ja", "oui", "1", "x", "contains", "tartalmaz", "enthalt", "contient",
];


/// Typed output of [`ResultValidator::validate_and_normalize`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedExtraction {
    pub nutrition: NutritionTable,
    pub allergens: AllergenFlags,
    /// Dotted paths (`nutrition.fat`, `allergens.milk`) that were missing or malformed.
    pub defaulted_fields: Vec<String>,
}

impl NormalizedExtraction {
    /// Same shape the model is asked to produce.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "nutrition": self.nutrition,
            "allergens": self.allergens,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultValidator;

impl ResultValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, raw: &RawExtraction) -> NormalizedExtraction {
        self.validate_and_normalize(&raw.to_value())
    }

    /// Total over any JSON value; non-objects are treated as empty.
    pub fn validate_and_normalize(&self, raw: &Value) -> NormalizedExtraction {
        let empty = Map::new();
        let root = raw.as_object().unwrap_or(&empty);
        let mut defaulted = Vec::new();

        let nutrition_src = find_container(root, NUTRITION_CONTAINERS).and_then(Value::as_object);
        let mut nutrition = NutritionTable::default();
        for key in NutrientKey::ALL {
            let entry = nutrition_src.and_then(|n| nutrient_entry(n, key));
            let (value, was_defaulted) = normalize_nutrient(key, entry);
            if was_defaulted {
                defaulted.push(format!("nutrition.{}", key.as_str()));
            }
            nutrition.set(key, value);
        }

        if nutrition.get(NutrientKey::Sodium).is_empty() {
            if let Some(salt) = find_salt(raw) {
                let sodium = format_decimal(salt * SODIUM_PER_SALT);
                debug!(salt, sodium = %sodium, "Derived sodium from salt");
                nutrition.set(NutrientKey::Sodium, NutrientValue::new(sodium, "g"));
                defaulted.retain(|f| f != "nutrition.sodium");
            }
        }

        let allergen_src = find_container(root, ALLERGEN_CONTAINERS);
        let allergens = normalize_allergens(allergen_src, &mut defaulted);

        NormalizedExtraction {
            nutrition,
            allergens,
            defaulted_fields: defaulted,
        }
    }
}

/// Returns the normalised value and whether it had to be defaulted.
fn normalize_nutrient(key: NutrientKey, entry: Option<&Value>) -> (NutrientValue, bool) {
    let Some(entry) = entry else {
        return (NutrientValue::default(), true);
    };

    let raw_amount = entry_amount(entry);
    let mut amount = raw_amount.as_deref().and_then(normalize_amount);
    let mut malformed = raw_amount.is_some() && amount.is_none();

    if key == NutrientKey::Energy {
        if let Some(a) = &amount {
            if a.parse::<f64>().map_or(true, |v| v <= 0.0) {
                amount = None;
                malformed = true;
            }
        }
    }

    let unit = match amount {
        Some(_) => entry_unit(entry).or_else(|| raw_amount.as_deref().and_then(infer_unit)),
        None => None,
    };

    (
        NutrientValue {
            amount_per_100g: amount,
            unit,
        },
        malformed,
    )
}

/// Normalise a free-form amount to a `.`-decimal number string.
///
/// The first numeric token is kept as written (`"< 0,5 g"` → `"0.5"`), with
/// a leading zero added to bare fractions (`".5"` → `"0.5"`).
/// Negative values clamp to `"0"`; "not stated" markers and strings without
/// digits become `None`.
pub fn normalize_amount(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty()
        || NO_DATA_EXACT.contains(&lower.as_str())
        || NO_DATA_PHRASES.iter().any(|p| lower.contains(p))
    {
        return None;
    }

    let dotted = RE_DECIMAL_COMMA.replace_all(&lower, "$1.$2");
    let token = RE_NUMBER.find(&dotted)?.as_str();
    if token.starts_with('-') {
        return Some("0".to_string());
    }
    match token.strip_prefix('.') {
        Some(frac) => Some(format!("0.{frac}")),
        None => Some(token.to_string()),
    }
}

fn infer_unit(raw: &str) -> Option<String> {
    let caps = RE_UNIT_SUFFIX.captures(raw)?;
    let unit = match caps[1].to_lowercase().as_str() {
        "kj" => "kJ",
        "kcal" => "kcal",
        "mg" => "mg",
        "µg" | "mcg" => "µg",
        _ => "g",
    };
    Some(unit.to_string())
}

/// Shortest decimal with at least one fractional digit, three at most.
///
/// `1.0000000000000002` → `"1.0"`, `0.48` → `"0.48"`.
pub fn format_decimal(v: f64) -> String {
    let mut s = format!("{:.3}", v.max(0.0));
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.push('0');
    }
    s
}

/// Salt amount anywhere in the response, in grams.
///
/// Looks at object keys named salt (any language) first, then at free text
/// such as `"salt: 2,5 g"`. Amounts stated in mg or µg are converted; a
/// missing unit means grams.
fn find_salt(raw: &Value) -> Option<f64> {
    salt_from_keys(raw).or_else(|| salt_from_text(raw))
}

fn salt_from_keys(v: &Value) -> Option<f64> {
    match v {
        Value::Object(map) => map
            .iter()
            .find_map(|(k, entry)| {
                if !SALT_ALIASES.contains(&fold_key(k).as_str()) {
                    return None;
                }
                let raw_amount = entry_amount(entry)?;
                let amount = normalize_amount(&raw_amount)?.parse::<f64>().ok()?;
                let unit = entry_unit(entry).or_else(|| infer_unit(&raw_amount));
                Some(to_grams(amount, unit.as_deref()))
            })
            .or_else(|| map.values().find_map(salt_from_keys)),
        Value::Array(items) => items.iter().find_map(salt_from_keys),
        _ => None,
    }
}

fn salt_from_text(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => RE_SALT_IN_TEXT
            .captures(s)
            .and_then(|c| {
                let amount = c[1].replace(',', ".").parse::<f64>().ok()?;
                Some(to_grams(amount, c.get(2).map(|m| m.as_str())))
            }),
        Value::Object(map) => map.values().find_map(salt_from_text),
        Value::Array(items) => items.iter().find_map(salt_from_text),
        _ => None,
    }
}

fn to_grams(amount: f64, unit: Option<&str>) -> f64 {
    match unit.map(|u| u.trim().to_lowercase()).as_deref() {
        Some("mg") => amount / 1_000.0,
        Some("µg") | Some("μg") | Some("mcg") | Some("ug") => amount / 1_000_000.0,
        _ => amount,
    }
}

fn normalize_allergens(src: Option<&Value>, defaulted: &mut Vec<String>) -> AllergenFlags {
    let mut flags = AllergenFlags::default();

    match src {
        Some(Value::Object(map)) => {
            for key in AllergenKey::ALL {
                let entry = map
                    .iter()
                    .find(|(k, _)| key.aliases().contains(&fold_key(k).as_str()))
                    .map(|(_, v)| v);
                match entry.and_then(coerce_bool) {
                    Some(present) => flags.set(key, present),
                    None => defaulted.push(format!("allergens.{}", key.as_str())),
                }
            }
        }
        Some(Value::Array(names)) => {
            for name in names.iter().filter_map(Value::as_str) {
                if let Some(key) = AllergenKey::from_name(name) {
                    flags.set(key, true);
                }
            }
        }
        _ => defaulted.extend(AllergenKey::ALL.iter().map(|k| format!("allergens.{}", k.as_str()))),
    }

    flags
}

/// `None` when the value has no boolean reading (null, arrays, objects).
fn coerce_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => Some(TRUTHY.contains(&fold_key(s).as_str())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(v: Value) -> NormalizedExtraction {
        ResultValidator::new().validate_and_normalize(&v)
    }

    #[test]
    fn amount_normalisation() {
        assert_eq!(normalize_amount("18,9"), Some("18.9".into()));
        assert_eq!(normalize_amount("6.9 g"), Some("6.9".into()));
        assert_eq!(normalize_amount("< 0,5 g"), Some("0.5".into()));
        assert_eq!(normalize_amount("-5"), Some("0".into()));
        assert_eq!(normalize_amount(".5 g"), Some("0.5".into()));
        assert_eq!(normalize_amount("-.5"), Some("0".into()));
        assert_eq!(normalize_amount("nincs adat"), None);
        assert_eq!(normalize_amount("Keine Angabe"), None);
        assert_eq!(normalize_amount("—"), None);
        assert_eq!(normalize_amount("n/a"), None);
        assert_eq!(normalize_amount("trace"), None);
    }

    #[test]
    fn decimal_comma_in_entry() {
        let r = validate(json!({"nutrition": {"fat": {"per_100g": "18,9", "unit": "g"}}}));
        assert_eq!(r.nutrition.get(NutrientKey::Fat), &NutrientValue::new("18.9", "g"));
    }

    #[test]
    fn salt_derives_sodium() {
        let r = validate(json!({"nutrition": {"salt": {"per_100g": "2.5", "unit": "g"}}}));
        assert_eq!(r.nutrition.get(NutrientKey::Sodium), &NutrientValue::new("1.0", "g"));
        assert!(!r.defaulted_fields.contains(&"nutrition.sodium".to_string()));
    }

    #[test]
    fn salt_in_milligrams_converted_before_deriving_sodium() {
        let r = validate(json!({"nutrition": {
            "fat": {"per_100g": "3", "unit": "g"},
            "salt": {"per_100g": "250", "unit": "mg"}
        }}));
        assert_eq!(r.nutrition.get(NutrientKey::Sodium), &NutrientValue::new("0.1", "g"));

        let r = validate(json!({"nutrition": {"salt": "750 mg"}}));
        assert_eq!(r.nutrition.get(NutrientKey::Sodium), &NutrientValue::new("0.3", "g"));

        let r = validate(json!({"nutrition": {"fat": "3"}, "notes": "Salz: 500 mg"}));
        assert_eq!(r.nutrition.get(NutrientKey::Sodium), &NutrientValue::new("0.2", "g"));
    }

    #[test]
    fn salt_found_in_free_text() {
        let r = validate(json!({"nutrition": {"fat": "3"}, "notes": "Só: 1,2 g"}));
        assert_eq!(r.nutrition.get(NutrientKey::Sodium).amount_per_100g.as_deref(), Some("0.48"));
    }

    #[test]
    fn explicit_sodium_wins_over_salt() {
        let r = validate(json!({"nutrition": {"sodium": "0.3 g", "salt": "2.5"}}));
        assert_eq!(r.nutrition.get(NutrientKey::Sodium), &NutrientValue::new("0.3", "g"));
    }

    #[test]
    fn energy_non_positive_is_null() {
        let r = validate(json!({"nutrition": {"energy": {"per_100g": "0", "unit": "kJ"}}}));
        assert!(r.nutrition.get(NutrientKey::Energy).is_empty());
        assert!(r.defaulted_fields.contains(&"nutrition.energy".to_string()));
    }

    #[test]
    fn unit_inferred_from_amount() {
        let r = validate(json!({"nutrition": {"energia": "1520 kJ", "cukor": "22g"}}));
        assert_eq!(r.nutrition.get(NutrientKey::Energy), &NutrientValue::new("1520", "kJ"));
        assert_eq!(r.nutrition.get(NutrientKey::Sugar), &NutrientValue::new("22", "g"));
    }

    #[test]
    fn allergen_coercion() {
        let r = validate(json!({"allergens": {
            "milk": "true", "egg": "Yes", "gluten": true, "soy": 1,
            "nuts": "no", "fish": 0
        }}));
        assert!(r.allergens.get(AllergenKey::Milk));
        assert!(r.allergens.get(AllergenKey::Egg));
        assert!(r.allergens.get(AllergenKey::Gluten));
        assert!(r.allergens.get(AllergenKey::Soy));
        assert!(!r.allergens.get(AllergenKey::Nuts));
        assert!(!r.allergens.get(AllergenKey::Fish));
        assert!(!r.allergens.get(AllergenKey::Celery));
        assert!(r.defaulted_fields.contains(&"allergens.celery".to_string()));
    }

    #[test]
    fn allergen_name_list() {
        let r = validate(json!({"allergens": ["Tojás", "tej", "lupin"]}));
        assert_eq!(r.allergens.present(), vec![AllergenKey::Egg, AllergenKey::Milk]);
    }

    #[test]
    fn total_over_garbage() {
        for v in [json!(null), json!(42), json!("text"), json!([1, 2]), json!({})] {
            let r = validate(v);
            assert_eq!(r.nutrition.iter().count(), 6);
            assert_eq!(r.allergens.iter().count(), 10);
            assert_eq!(r.defaulted_fields.len(), 16);
        }
    }

    #[test]
    fn idempotent_on_own_output() {
        let first = validate(json!({
            "nutrition": {
                "energia": {"per_100g": "1520 kJ"},
                "zsír": {"per_100g": "18,9", "unit": "g"},
                "só": {"per_100g": "2,5", "unit": "g"},
                "fehérje": "-1"
            },
            "allergens": {"tej": "igen", "gluten": 1}
        }));
        let second = validate(first.to_value());
        assert_eq!(first.nutrition, second.nutrition);
        assert_eq!(first.allergens, second.allergens);
        assert_eq!(validate(second.to_value()), second);
    }

    #[test]
    fn format_decimal_keeps_one_fraction_digit() {
        assert_eq!(format_decimal(2.5 * 0.4), "1.0");
        assert_eq!(format_decimal(0.48), "0.48");
        assert_eq!(format_decimal(0.1234), "0.123");
        assert_eq!(format_decimal(-1.0), "0.0");
    }
}
