use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single value exactly as the language model reported it.
///
/// Models are inconsistent about quoting: the same field arrives as `"95"`,
/// `95` or `95.0` from one run to the next. Every form is kept as text and the
/// field mapper decides what counts as numeric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ReportedValue(String);

impl ReportedValue {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trimmed text, or `None` when nothing was reported.
    pub fn non_blank(&self) -> Option<&str> {
        let trimmed = self.0.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

impl<'de> Deserialize<'de> for ReportedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Objects and arrays are kept as compact JSON so the mapper can log
        // them as non-numeric instead of failing the whole record.
        let text = match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Ok(Self(text))
    }
}

/// Flat lab report as structured by the language model.
///
/// Field order matters: the observation table walks the lab values in this
/// order and the resulting bundle numbering follows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LabRecord {
    // Report metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practitioner: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sex: Option<ReportedValue>,
    #[serde(deserialize_with = "lenient_list", skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<String>,

    // Complete blood count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub erythrocytes: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hemoglobin: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hbe_mch: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcv: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hematocrit: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mchc: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rdw_ery: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platelets: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leukocytes: Option<ReportedValue>,

    // Liver, pancreas, electrolytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub got_ast: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpt_alt: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamma_gt: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bilirubin: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amylase: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sodium: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub potassium: Option<ReportedValue>,

    // Metabolism and lipids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glucose: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hb_a1c_absolute: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hb_a1c_relative: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cholesterol: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triglycerides: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hdl_cholesterol: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ldl_cholesterol: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsh_basal: Option<ReportedValue>,

    // Kidney
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creatinine: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gfr2005: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gfr2009: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urea: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uric_acid: Option<ReportedValue>,

    // Iron, inflammation, vitamins
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iron: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ferritin: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crp: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitamin_d3: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vitamin_b12: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folic_acid: Option<ReportedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub non_hdl_cholesterol: Option<ReportedValue>,
}

impl LabRecord {
    pub fn patient(&self) -> Option<&str> {
        self.patient.as_ref().and_then(ReportedValue::non_blank)
    }

    pub fn practitioner(&self) -> Option<&str> {
        self.practitioner.as_ref().and_then(ReportedValue::non_blank)
    }

    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_ref().and_then(ReportedValue::non_blank)
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_ref().and_then(ReportedValue::non_blank)
    }
}

/// Accept a list of strings, a single string, or null/empty.
///
/// After repair a `null` list arrives as `""`, so an empty string means "no
/// materials" rather than one blank material.
fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(values) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.trim().is_empty())
            .collect(),
        Value::String(s) if s.trim().is_empty() => vec![],
        Value::String(s) => vec![s],
        Value::Null => vec![],
        other => vec![other.to_string()],
    };
    Ok(items)
}
