//! Quality gate: decide whether a text-path answer deserves a visual retry.
//!
//! Pure and deterministic. The gate reads the raw model response through the
//! same alias lookups the validator uses, so "sodium missing" means the same
//! thing in both places.

use crate::output::{ExtractionProvenance, RawExtraction};
use crate::schema::{entry_amount, nutrient_entry, NutrientKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why the gate asked for visual re-analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EscalationReason {
    /// `nutrition` absent, not an object, or empty.
    MissingNutrition,
    /// Every nutrient amount is null.
    AllNutrientsNull,
    /// Sodium null while another nutrient is populated.
    SodiumMissing,
    /// OCR text and the response contains a known misread.
    OcrConfusion { token: String },
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::MissingNutrition => write!(f, "nutrition section missing"),
            EscalationReason::AllNutrientsNull => write!(f, "all nutrient values null"),
            EscalationReason::SodiumMissing => write!(f, "sodium missing"),
            EscalationReason::OcrConfusion { token } => {
                write!(f, "OCR confusion token '{token}' in response")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct QualityGate {
    confusions: Vec<String>,
}

impl QualityGate {
    pub fn new(confusions: Vec<String>) -> Self {
        Self { confusions }
    }

    /// First escalation condition that holds, checked in order.
    pub fn evaluate(
        &self,
        result: &RawExtraction,
        provenance: &ExtractionProvenance,
    ) -> Option<EscalationReason> {
        let nutrition = match result.nutrition() {
            Some(n) if !n.is_empty() => n,
            _ => return Some(EscalationReason::MissingNutrition),
        };

        let populated = |key| {
            nutrient_entry(nutrition, key)
                .and_then(entry_amount)
                .is_some()
        };

        if NutrientKey::ALL.into_iter().all(|k| !populated(k)) {
            return Some(EscalationReason::AllNutrientsNull);
        }

        if !populated(NutrientKey::Sodium) {
            return Some(EscalationReason::SodiumMissing);
        }

        if provenance.ocr_used {
            let serialised = result.to_json_string();
            if let Some(token) = self.confusions.iter().find(|t| serialised.contains(t.as_str())) {
                return Some(EscalationReason::OcrConfusion {
                    token: token.clone(),
                });
            }
        }

        None
    }

    pub fn needs_visual_escalation(
        &self,
        result: &RawExtraction,
        provenance: &ExtractionProvenance,
    ) -> bool {
        self.evaluate(result, provenance).is_some()
    }
}
