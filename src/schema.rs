//! Fixed key sets for nutrients and allergens, plus loose lookups into the
//! untyped model response.
//!
//! Models answer in whatever language the label was printed in, so every
//! key carries an alias table. Both the quality gate and the validator read
//! the raw response through [`nutrient_entry`] and [`entry_amount`] so they
//! agree on what "sodium is missing" means.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The six nutrients reported per 100 g.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NutrientKey {
    Energy,
    Fat,
    Carbohydrate,
    Sugar,
    Protein,
    Sodium,
}

impl NutrientKey {
    pub const ALL: [NutrientKey; 6] = [
        NutrientKey::Energy,
        NutrientKey::Fat,
        NutrientKey::Carbohydrate,
        NutrientKey::Sugar,
        NutrientKey::Protein,
        NutrientKey::Sodium,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NutrientKey::Energy => "energy",
            NutrientKey::Fat => "fat",
            NutrientKey::Carbohydrate => "carbohydrate",
            NutrientKey::Sugar => "sugar",
            NutrientKey::Protein => "protein",
            NutrientKey::Sodium => "sodium",
        }
    }

    /// Accepted spellings, compared after [`fold_key`].
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            NutrientKey::Energy => &["energy", "energia", "energie", "calories", "energyvalue"],
            NutrientKey::Fat => &["fat", "fats", "totalfat", "zsir", "fett", "matieresgrasses", "lipides"],
            NutrientKey::Carbohydrate => &[
                "carbohydrate",
                "carbohydrates",
                "carbs",
                "szenhidrat",
                "kohlenhydrate",
                "glucides",
            ],
            NutrientKey::Sugar => &["sugar", "sugars", "cukor", "cukrok", "zucker", "sucres"],
            NutrientKey::Protein => &["protein", "proteins", "feherje", "eiweiss", "proteines"],
            NutrientKey::Sodium => &["sodium", "natrium"],
        }
    }
}

/// Keys under which a salt figure may appear.
pub const SALT_ALIASES: &[&str] = &["salt", "so", "salz", "sel"];

/// The ten allergens tracked by the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllergenKey {
    Gluten,
    Egg,
    Crustacean,
    Fish,
    Peanut,
    Soy,
    Milk,
    Nuts,
    Celery,
    Mustard,
}

impl AllergenKey {
    pub const ALL: [AllergenKey; 10] = [
        AllergenKey::Gluten,
        AllergenKey::Egg,
        AllergenKey::Crustacean,
        AllergenKey::Fish,
        AllergenKey::Peanut,
        AllergenKey::Soy,
        AllergenKey::Milk,
        AllergenKey::Nuts,
        AllergenKey::Celery,
        AllergenKey::Mustard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AllergenKey::Gluten => "gluten",
            AllergenKey::Egg => "egg",
            AllergenKey::Crustacean => "crustacean",
            AllergenKey::Fish => "fish",
            AllergenKey::Peanut => "peanut",
            AllergenKey::Soy => "soy",
            AllergenKey::Milk => "milk",
            AllergenKey::Nuts => "nuts",
            AllergenKey::Celery => "celery",
            AllergenKey::Mustard => "mustard",
        }
    }

    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            AllergenKey::Gluten => &["gluten", "cereals", "cerealscontaininggluten", "wheat"],
            AllergenKey::Egg => &["egg", "eggs", "tojas", "ei", "eier", "oeuf", "oeufs"],
            AllergenKey::Crustacean => &[
                "crustacean",
                "crustaceans",
                "rakfelek",
                "krebstiere",
                "crustaces",
            ],
            AllergenKey::Fish => &["fish", "hal", "fisch", "poisson"],
            AllergenKey::Peanut => &[
                "peanut",
                "peanuts",
                "foldimogyoro",
                "erdnuss",
                "erdnusse",
                "arachide",
                "arachides",
            ],
            AllergenKey::Soy => &["soy", "soya", "soja", "soybean", "soybeans", "szoja"],
            AllergenKey::Milk => &["milk", "dairy", "lactose", "tej", "milch", "lait"],
            AllergenKey::Nuts => &[
                "nuts",
                "nut",
                "treenuts",
                "diofelek",
                "schalenfruchte",
                "noix",
                "fruitsacoque",
            ],
            AllergenKey::Celery => &["celery", "zeller", "sellerie", "celeri"],
            AllergenKey::Mustard => &["mustard", "mustar", "senf", "moutarde"],
        }
    }

    /// Resolve a free-form allergen name ("Tojás", "tree nuts") to a key.
    pub fn from_name(name: &str) -> Option<AllergenKey> {
        let folded = fold_key(name);
        AllergenKey::ALL
            .into_iter()
            .find(|k| k.aliases().contains(&folded.as_str()))
    }
}

/// Lowercase, strip accents and drop everything but ASCII letters/digits.
///
/// `"Nátrium"`, `"nátrium"` and `"NATRIUM"` all fold to `"natrium"`;
/// `"tree_nuts"` folds to `"treenuts"`.
pub fn fold_key(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .map(strip_accent)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

fn strip_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'ő' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'ű' => 'u',
        'ç' => 'c',
        'ß' => 's',
        other => other,
    }
}

/// Top-level keys (folded) under which the nutrition object may appear.
pub const NUTRITION_CONTAINERS: &[&str] = &["nutrition", "nutrients", "nutritionfacts", "tapertek"];
/// Top-level keys (folded) under which the allergen object may appear.
pub const ALLERGEN_CONTAINERS: &[&str] = &["allergens", "allergenek", "allergene", "allergenes"];

/// First top-level value whose folded key is one of `names`.
pub fn find_container<'a>(root: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    root.iter()
        .find(|(k, _)| names.contains(&fold_key(k).as_str()))
        .map(|(_, v)| v)
}

/// Find the entry for `key` in a loosely-typed nutrition object.
pub fn nutrient_entry(nutrition: &Map<String, Value>, key: NutrientKey) -> Option<&Value> {
    let aliases = key.aliases();
    nutrition
        .iter()
        .find(|(k, _)| aliases.contains(&fold_key(k).as_str()))
        .map(|(_, v)| v)
}

/// Field names a model may use for the per-100 g figure inside an entry.
const AMOUNT_FIELDS: &[&str] = &["per_100g", "per100g", "amount", "value", "amount_per_100g"];

/// The raw per-100 g amount of an entry, as text. `None` for null/empty.
///
/// Entries may be objects (`{"per_100g": "6,9", "unit": "g"}`) or bare
/// scalars (`"6,9 g"`, `6.9`).
pub fn entry_amount(entry: &Value) -> Option<String> {
    let raw = match entry {
        Value::Object(obj) => AMOUNT_FIELDS.iter().find_map(|f| obj.get(*f))?,
        other => other,
    };
    match raw {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The unit declared on an entry, if any.
pub fn entry_unit(entry: &Value) -> Option<String> {
    match entry.as_object()?.get("unit")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn container_lookup_accepts_aliases() {
        let root = json!({"Tápérték": {"fat": "1"}, "Allergének": {}});
        let root = root.as_object().unwrap();
        assert!(find_container(root, NUTRITION_CONTAINERS).is_some());
        assert!(find_container(root, ALLERGEN_CONTAINERS).is_some());
        assert!(find_container(&Map::new(), NUTRITION_CONTAINERS).is_none());
    }

    #[test]
    fn fold_key_strips_accents_and_punctuation() {
        assert_eq!(fold_key("Nátrium"), "natrium");
        assert_eq!(fold_key("szénhidrát"), "szenhidrat");
        assert_eq!(fold_key("tree_nuts"), "treenuts");
        assert_eq!(fold_key("Földimogyoró"), "foldimogyoro");
    }

    #[test]
    fn nutrient_entry_matches_aliases() {
        let v = json!({"nátrium": {"per_100g": "0.4"}, "Zsír": "3"});
        let map = v.as_object().unwrap();
        assert!(nutrient_entry(map, NutrientKey::Sodium).is_some());
        assert!(nutrient_entry(map, NutrientKey::Fat).is_some());
        assert!(nutrient_entry(map, NutrientKey::Protein).is_none());
    }

    #[test]
    fn entry_amount_handles_shapes() {
        assert_eq!(entry_amount(&json!({"per_100g": "6,9"})), Some("6,9".into()));
        assert_eq!(entry_amount(&json!({"amount": 12})), Some("12".into()));
        assert_eq!(entry_amount(&json!("  4.5 g ")), Some("4.5 g".into()));
        assert_eq!(entry_amount(&json!({"per_100g": null})), None);
        assert_eq!(entry_amount(&json!({"per_100g": "  "})), None);
        assert_eq!(entry_amount(&Value::Null), None);
    }

    #[test]
    fn allergen_from_name() {
        assert_eq!(AllergenKey::from_name("Tojás"), Some(AllergenKey::Egg));
        assert_eq!(AllergenKey::from_name("tree nuts"), Some(AllergenKey::Nuts));
        assert_eq!(AllergenKey::from_name("lupin"), None);
    }

    #[test]
    fn key_serialisation_is_snake_case() {
        assert_eq!(serde_json::to_string(&NutrientKey::Carbohydrate).unwrap(), "\"carbohydrate\"");
        assert_eq!(serde_json::to_string(&AllergenKey::Crustacean).unwrap(), "\"crustacean\"");
    }
}
