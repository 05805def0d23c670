//! Result types: what the pipeline hands back to callers.
//!
//! [`ValidatedResult`] is the only value that crosses the service boundary.
//! [`AnalysisResponse`] wraps it in the stable wire envelope, and
//! [`Diagnostics`] carries everything else (cascade attempts, escalation
//! reason, state trace) for logs and the CLI's `--diagnostics` flag.

use crate::analyze::PipelineState;
use crate::pipeline::cascade::ExtractionStage;
use crate::pipeline::quality::EscalationReason;
use crate::schema::{find_container, AllergenKey, NutrientKey, NUTRITION_CONTAINERS};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ── Nutrition ────────────────────────────────────────────────────────────

/// One nutrient figure, normalised to a `.`-separated decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutrientValue {
    #[serde(rename = "per_100g")]
    pub amount_per_100g: Option<String>,
    pub unit: Option<String>,
}

impl NutrientValue {
    pub fn new(amount: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            amount_per_100g: Some(amount.into()),
            unit: Some(unit.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.amount_per_100g.is_none()
    }
}

/// All six nutrients, always present.
///
/// Construction goes through [`NutritionTable::default`] which fills every
/// key, so a table can never be missing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NutritionTable(BTreeMap<NutrientKey, NutrientValue>);

impl Default for NutritionTable {
    fn default() -> Self {
        Self(
            NutrientKey::ALL
                .into_iter()
                .map(|k| (k, NutrientValue::default()))
                .collect(),
        )
    }
}

impl NutritionTable {
    pub fn get(&self, key: NutrientKey) -> &NutrientValue {
        static EMPTY: NutrientValue = NutrientValue {
            amount_per_100g: None,
            unit: None,
        };
        self.0.get(&key).unwrap_or(&EMPTY)
    }

    pub fn set(&mut self, key: NutrientKey, value: NutrientValue) {
        self.0.insert(key, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (NutrientKey, &NutrientValue)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

// ── Allergens ────────────────────────────────────────────────────────────

/// The ten allergen flags as strict booleans, always all present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllergenFlags(BTreeMap<AllergenKey, bool>);

impl Default for AllergenFlags {
    fn default() -> Self {
        Self(AllergenKey::ALL.into_iter().map(|k| (k, false)).collect())
    }
}

impl AllergenFlags {
    pub fn get(&self, key: AllergenKey) -> bool {
        self.0.get(&key).copied().unwrap_or(false)
    }

    pub fn set(&mut self, key: AllergenKey, present: bool) {
        self.0.insert(key, present);
    }

    pub fn iter(&self) -> impl Iterator<Item = (AllergenKey, bool)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    /// Keys flagged `true`, in declaration order.
    pub fn present(&self) -> Vec<AllergenKey> {
        self.iter().filter(|(_, v)| *v).map(|(k, _)| k).collect()
    }
}

// ── Boundary types ───────────────────────────────────────────────────────

/// Request metadata reported alongside the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMetadata {
    /// Two-letter language code of the cleaned text (e.g. `"hu"`).
    pub language: String,
    /// True when the text came from (or fell back to) OCR.
    pub ocr_used: bool,
    /// Characters in the cleaned text sent to the model.
    pub char_count: usize,
}

/// Validated nutrition and allergen data for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedResult {
    pub nutrition: NutritionTable,
    pub allergens: AllergenFlags,
    pub metadata: ResultMetadata,
}

/// `data` section of the wire envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub nutrition: NutritionTable,
    pub allergens: AllergenFlags,
}

/// Stable wire envelope: `{ "data": {...}, "metadata": {...} }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub data: ResponseData,
    pub metadata: ResultMetadata,
}

impl From<ValidatedResult> for AnalysisResponse {
    fn from(r: ValidatedResult) -> Self {
        Self {
            data: ResponseData {
                nutrition: r.nutrition,
                allergens: r.allergens,
            },
            metadata: r.metadata,
        }
    }
}

/// Error payload for the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// `"client_error"` or `"server_error"`.
    pub status: String,
    pub detail: String,
}

impl ErrorResponse {
    pub fn client_error(detail: impl Into<String>) -> Self {
        Self {
            status: "client_error".to_string(),
            detail: detail.into(),
        }
    }

    pub fn server_error(detail: impl Into<String>) -> Self {
        Self {
            status: "server_error".to_string(),
            detail: detail.into(),
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status == "client_error"
    }
}

// ── Intermediate + diagnostics ───────────────────────────────────────────

/// The model's answer as an untyped JSON object.
///
/// Nothing downstream trusts its shape except
/// [`crate::pipeline::validate::ResultValidator`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExtraction(Map<String, Value>);

impl RawExtraction {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// `None` unless `value` is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The nutrition object under any accepted container key (`nutrition`,
    /// `nutrients`, `tápérték`...), if present and object-shaped.
    pub fn nutrition(&self) -> Option<&Map<String, Value>> {
        find_container(&self.0, NUTRITION_CONTAINERS).and_then(Value::as_object)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Compact JSON text, used for substring checks.
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

/// One extraction stage's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub stage: ExtractionStage,
    #[serde(skip)]
    pub text: String,
    pub char_count: usize,
    /// Reached the minimum-viable-content threshold.
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Which stage's text went downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionProvenance {
    pub final_stage: ExtractionStage,
    pub ocr_used: bool,
}

/// Everything about a run that is not part of the result itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    pub page_count: usize,
    pub attempts: Vec<ExtractionAttempt>,
    pub provenance: Option<ExtractionProvenance>,
    /// Whether the nutrition excerpt was located in the text.
    pub excerpt_found: bool,
    pub escalation: Option<EscalationReason>,
    pub vision_used: bool,
    pub vision_error: Option<String>,
    /// Fields the validator had to default (missing or malformed upstream).
    pub defaulted_fields: Vec<String>,
    pub states: Vec<PipelineState>,
    pub duration_ms: u64,
}

/// Result plus diagnostics, from [`crate::analyze::NutritionPipeline::analyze_with_report`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub result: ValidatedResult,
    pub diagnostics: Diagnostics,
}
