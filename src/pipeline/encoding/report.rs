use chrono::{DateTime, NaiveDate, Utc};

use super::codes::{namespaces, profiles, systems, LAB_REPORT_CODE, LAB_STUDIES_CODE};
use super::format_instant;
use crate::models::fhir::{
    CodeableConcept, Coding, DiagnosticReport, Identifier, Meta, Observation, Reference,
    ResultStatus,
};
use crate::models::LabRecord;

/// Date layouts found on lab reports: ISO, then German/European forms.
const REPORT_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"];

/// Identifier prefix when the record names no patient.
const UNKNOWN_PATIENT: &str = "unknown";

/// Parse a report date in any of the accepted layouts.
pub fn parse_report_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    REPORT_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

/// Build the report header for `observations`, stamped now.
pub fn build_report(record: &LabRecord, observations: &[Observation]) -> DiagnosticReport {
    build_report_at(record, observations, Utc::now())
}

/// Build the report header for `observations`.
///
/// Never fails. A missing or unparseable `date` falls back to `built_at`.
/// `result` follows the order of `observations`.
pub fn build_report_at(
    record: &LabRecord,
    observations: &[Observation],
    built_at: DateTime<Utc>,
) -> DiagnosticReport {
    let instant = format_instant(built_at);

    let effective = match record.date().and_then(parse_report_date) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => {
            tracing::warn!(
                date = record.date().unwrap_or_default(),
                fallback = %instant,
                "Report date missing or unparseable, using build time"
            );
            instant.clone()
        }
    };

    let identifier = Identifier {
        kind: Some(CodeableConcept::from_codings(vec![Coding::new(
            systems::IDENTIFIER_TYPE,
            "FILL",
            "Filler Identifier",
        )])),
        system: Some(namespaces::REPORT.to_string()),
        value: format!("{}-{}", record.patient().unwrap_or(UNKNOWN_PATIENT), instant),
    };

    let based_on = record
        .order_id()
        .map(|order| {
            Reference::to_identifier(Identifier {
                kind: None,
                system: Some(namespaces::ORDER.to_string()),
                value: order.to_string(),
            })
        })
        .into_iter()
        .collect();

    let result = observations
        .iter()
        .filter_map(Observation::primary_identifier)
        .map(|id| Reference::to_identifier(id.clone()))
        .collect();

    DiagnosticReport {
        meta: Meta::profile(profiles::DIAGNOSTIC_REPORT_LAB),
        identifier: vec![identifier],
        based_on,
        status: ResultStatus::Final,
        category: vec![CodeableConcept::from_codings(vec![
            Coding::new(systems::LOINC, LAB_STUDIES_CODE, "Laboratory studies"),
            Coding::new(systems::DIAGNOSTIC_SERVICE_SECTION, "LAB", "Laboratory"),
        ])],
        code: CodeableConcept::from_codings(vec![Coding::new(
            systems::LOINC,
            LAB_REPORT_CODE,
            "Laboratory report",
        )]),
        subject: record.patient().map(Reference::to_value),
        effective_date_time: effective,
        performer: record.practitioner().map(Reference::to_value).into_iter().collect(),
        result,
    }
}
