//! FHIR R4 wire types for laboratory bundles.
//!
//! Only the elements the lab encoder fills are modelled. Field names follow
//! FHIR JSON (camelCase, `resourceType` tags, absent optionals omitted).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    pub system: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: &str, code: &str, display: &str) -> Self {
        Self {
            system: system.to_string(),
            code: code.to_string(),
            display: Some(display.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    pub coding: Vec<Coding>,
}

impl CodeableConcept {
    pub fn from_codings(coding: Vec<Coding>) -> Self {
        Self { coding }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub value: String,
}

impl Identifier {
    pub fn value(value: &str) -> Self {
        Self {
            kind: None,
            system: None,
            value: value.to_string(),
        }
    }
}

/// Logical reference. The lab encoder never has server-assigned ids, so
/// every reference points at a business identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub identifier: Identifier,
}

impl Reference {
    pub fn to_identifier(identifier: Identifier) -> Self {
        Self { identifier }
    }

    pub fn to_value(value: &str) -> Self {
        Self::to_identifier(Identifier::value(value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
    pub system: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub profile: Vec<String>,
}

impl Meta {
    pub fn profile(url: &str) -> Self {
        Self {
            profile: vec![url.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub url: String,
}

/// Extension holder for a primitive value (`_effectiveDateTime` in JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimitiveElement {
    pub extension: Vec<Extension>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub meta: Meta,
    pub identifier: Vec<Identifier>,
    pub status: ResultStatus,
    pub category: Vec<CodeableConcept>,
    pub code: CodeableConcept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<String>,
    #[serde(
        rename = "_effectiveDateTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub effective_date_time_element: Option<PrimitiveElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer: Vec<Reference>,
    pub value_quantity: Quantity,
}

impl Observation {
    /// The identifier the report's `result` list points at.
    pub fn primary_identifier(&self) -> Option<&Identifier> {
        self.identifier.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub meta: Meta,
    pub identifier: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<Reference>,
    pub status: ResultStatus,
    pub category: Vec<CodeableConcept>,
    pub code: CodeableConcept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    pub effective_date_time: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<Reference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType")]
pub enum Resource {
    DiagnosticReport(DiagnosticReport),
    Observation(Observation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleType {
    Collection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    pub full_url: String,
    pub resource: Resource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType", rename_all = "camelCase")]
pub struct Bundle {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: BundleType,
    pub timestamp: String,
    pub entry: Vec<BundleEntry>,
}

impl Bundle {
    pub fn report(&self) -> Option<&DiagnosticReport> {
        match self.entry.first().map(|e| &e.resource) {
            Some(Resource::DiagnosticReport(report)) => Some(report),
            _ => None,
        }
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.entry.iter().filter_map(|e| match &e.resource {
            Resource::Observation(obs) => Some(obs),
            Resource::DiagnosticReport(_) => None,
        })
    }
}
