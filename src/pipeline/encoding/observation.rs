use chrono::{DateTime, Utc};

use super::codes::{
    namespaces, profiles, systems, ObservationSpec, LAB_STUDIES_CODE, OBSERVATION_SPECS,
};
use super::format_instant;
use super::report::parse_report_date;
use crate::models::fhir::{
    CodeableConcept, Coding, Extension, Identifier, Meta, Observation, PrimitiveElement,
    Quantity, Reference, ResultStatus,
};
use crate::models::LabRecord;

/// Map every numeric lab value of `record` to an `Observation`, stamped now.
pub fn map_observations(record: &LabRecord) -> Vec<Observation> {
    map_observations_at(record, Utc::now())
}

/// Map every numeric lab value of `record` to an `Observation`.
///
/// Walks the observation table in order. Unset and blank fields are skipped
/// silently; values that are not finite numbers are logged and skipped. All
/// observations of one call share `built_at`, so identifiers differ only by
/// field name.
pub fn map_observations_at(record: &LabRecord, built_at: DateTime<Utc>) -> Vec<Observation> {
    let instant = format_instant(built_at);
    let effective = record
        .date()
        .and_then(parse_report_date)
        .map(|d| d.format("%Y-%m-%d").to_string());
    let subject = record.patient().map(Reference::to_value);
    let performer: Vec<Reference> = record
        .practitioner()
        .map(Reference::to_value)
        .into_iter()
        .collect();

    let mut observations = Vec::new();
    for spec in OBSERVATION_SPECS.iter() {
        let Some(text) = spec.value_in(record).and_then(|v| v.non_blank()) else {
            continue;
        };
        let Some(value) = parse_numeric(text) else {
            tracing::warn!(field = spec.field, value = text, "Skipping non-numeric lab value");
            continue;
        };

        observations.push(Observation {
            meta: Meta::profile(profiles::OBSERVATION_LAB),
            identifier: vec![observation_identifier(spec, &instant)],
            status: ResultStatus::Final,
            category: vec![laboratory_category()],
            code: CodeableConcept::from_codings(vec![Coding::new(
                spec.system,
                spec.code,
                spec.display,
            )]),
            subject: subject.clone(),
            effective_date_time: effective.clone(),
            effective_date_time_element: effective.as_ref().map(|_| clinical_reference_date()),
            performer: performer.clone(),
            value_quantity: Quantity {
                value,
                unit: spec.unit.to_string(),
                system: spec.unit_system.to_string(),
                code: spec.unit.to_string(),
            },
        });
    }

    tracing::debug!(count = observations.len(), "Lab values mapped to observations");
    observations
}

/// Finite decimal after trimming; `NaN`, infinities and units are rejected.
fn parse_numeric(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn observation_identifier(spec: &ObservationSpec, instant: &str) -> Identifier {
    Identifier {
        kind: Some(CodeableConcept::from_codings(vec![Coding::new(
            systems::IDENTIFIER_TYPE,
            "MR",
            "Medical record number",
        )])),
        system: Some(namespaces::OBSERVATION.to_string()),
        value: format!("{}-{}", spec.field, instant),
    }
}

fn laboratory_category() -> CodeableConcept {
    CodeableConcept::from_codings(vec![
        Coding::new(systems::LOINC, LAB_STUDIES_CODE, "Laboratory studies"),
        Coding::new(systems::OBSERVATION_CATEGORY, "laboratory", "Laboratory"),
    ])
}

fn clinical_reference_date() -> PrimitiveElement {
    PrimitiveElement {
        extension: vec![Extension {
            url: profiles::CLINICAL_REFERENCE_DATE.to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use chrono::TimeZone;
    use tracing_subscriber::fmt::MakeWriter;

    use super::*;
    use crate::models::ReportedValue;

    fn fixed_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap()
    }

    fn record(json: &str) -> LabRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn each_table_entry_maps_alone() {
        for spec in OBSERVATION_SPECS.iter() {
            let json = format!(r#"{{"{}":"42.5"}}"#, spec.field);
            let observations = map_observations_at(&record(&json), fixed_instant());

            assert_eq!(observations.len(), 1, "field {}", spec.field);
            let obs = &observations[0];
            assert_eq!(obs.code.coding[0].code, spec.code);
            assert_eq!(obs.code.coding[0].system, spec.system);
            assert_eq!(obs.value_quantity.unit, spec.unit);
            assert_eq!(obs.value_quantity.system, systems::UCUM);
            assert_eq!(obs.value_quantity.value, 42.5);
        }
    }

    #[test]
    fn non_numeric_value_skipped_without_affecting_others() {
        let rec = record(r#"{"glucose":"95","crp":"<0.5","ferritin":"positiv","sodium":"140"}"#);
        let observations = map_observations_at(&rec, fixed_instant());

        let codes: Vec<_> = observations.iter().map(|o| o.code.coding[0].code.as_str()).collect();
        assert_eq!(codes, vec!["NA", "2345-7"]);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn non_numeric_value_logs_a_warning_per_field() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let rec = record(r#"{"glucose":"95","crp":"<0.5","ferritin":"positiv","sodium":"140"}"#);

        let observations = tracing::subscriber::with_default(subscriber, || {
            map_observations_at(&rec, fixed_instant())
        });

        assert_eq!(observations.len(), 2);
        let text = logs.text();
        assert_eq!(text.matches("Skipping non-numeric lab value").count(), 2);
        assert!(text.contains("WARN"));
        assert!(text.contains("crp") && text.contains("<0.5"));
        assert!(text.contains("ferritin") && text.contains("positiv"));
        assert!(!text.contains("glucose"));
        assert!(!text.contains("sodium"));
    }

    #[test]
    fn unset_and_blank_fields_skipped() {
        let mut rec = record(r#"{"hemoglobin":" 13.9 ","creatinine":null}"#);
        rec.urea = Some(ReportedValue::new("   "));
        let observations = map_observations_at(&rec, fixed_instant());

        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].value_quantity.value, 13.9);
    }

    #[test]
    fn non_finite_numbers_rejected() {
        assert_eq!(parse_numeric("NaN"), None);
        assert_eq!(parse_numeric("inf"), None);
        assert_eq!(parse_numeric("13,9"), None);
        assert_eq!(parse_numeric(" 7 "), Some(7.0));
        assert_eq!(parse_numeric("1e2"), Some(100.0));
    }

    #[test]
    fn mapping_is_order_stable() {
        let rec = record(r#"{"nonHdlCholesterol":"120","erythrocytes":"4.6","glucose":"95","leukocytes":"6.1"}"#);
        let first = map_observations_at(&rec, fixed_instant());
        let second = map_observations_at(&rec, fixed_instant());

        assert_eq!(first, second);
        let fields: Vec<_> = first
            .iter()
            .map(|o| o.primary_identifier().unwrap().value.clone())
            .collect();
        assert_eq!(
            fields,
            vec![
                "erythrocytes-2024-03-05T10:00:00.000Z",
                "leukocytes-2024-03-05T10:00:00.000Z",
                "glucose-2024-03-05T10:00:00.000Z",
                "nonHdlCholesterol-2024-03-05T10:00:00.000Z",
            ]
        );
    }

    #[test]
    fn references_and_effective_date_filled_from_metadata() {
        let rec = record(r#"{"patient":"P1","practitioner":"DrX","date":"05.03.2024","glucose":95}"#);
        let obs = &map_observations_at(&rec, fixed_instant())[0];

        assert_eq!(obs.subject.as_ref().unwrap().identifier.value, "P1");
        assert_eq!(obs.performer[0].identifier.value, "DrX");
        assert_eq!(obs.effective_date_time.as_deref(), Some("2024-03-05"));

        let json = serde_json::to_value(obs).unwrap();
        assert_eq!(
            json["_effectiveDateTime"]["extension"][0]["url"],
            profiles::CLINICAL_REFERENCE_DATE
        );
        assert_eq!(json["identifier"][0]["type"]["coding"][0]["code"], "MR");
        assert_eq!(json["identifier"][0]["system"], "Observation/");
        assert_eq!(json["category"][0]["coding"][1]["code"], "laboratory");
        assert_eq!(json["valueQuantity"]["code"], "mg/dl");
    }

    #[test]
    fn identifiers_share_the_current_instant() {
        let rec = record(r#"{"glucose":"95","sodium":"140"}"#);
        let observations = map_observations(&rec);

        let suffixes: Vec<_> = observations
            .iter()
            .map(|o| {
                let value = &o.primary_identifier().unwrap().value;
                value.split_once('-').unwrap().1.to_string()
            })
            .collect();
        assert_eq!(suffixes.len(), 2);
        assert_eq!(suffixes[0], suffixes[1]);
        assert!(DateTime::parse_from_rfc3339(&suffixes[0]).is_ok());
    }

    #[test]
    fn unparseable_date_leaves_effective_unset() {
        let rec = record(r#"{"date":"not-a-date","glucose":"95"}"#);
        let obs = &map_observations_at(&rec, fixed_instant())[0];

        assert!(obs.effective_date_time.is_none());
        assert!(obs.effective_date_time_element.is_none());
        assert!(obs.subject.is_none());
        assert!(obs.performer.is_empty());
    }
}
