use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::format_instant;
use crate::models::fhir::{
    Bundle, BundleEntry, BundleType, DiagnosticReport, Observation, Resource,
};

/// `fullUrl` prefix; entries are numbered from 1, the report first.
pub const ENTRY_URL_PREFIX: &str = "urn:lab-bundle:entry:";

/// Assemble a collection bundle, stamped now.
pub fn assemble_bundle(report: DiagnosticReport, observations: Vec<Observation>) -> Bundle {
    assemble_bundle_at(report, observations, Utc::now())
}

/// Assemble a collection bundle: the report, then the observations in order.
pub fn assemble_bundle_at(
    report: DiagnosticReport,
    observations: Vec<Observation>,
    built_at: DateTime<Utc>,
) -> Bundle {
    let resources = std::iter::once(Resource::DiagnosticReport(report))
        .chain(observations.into_iter().map(Resource::Observation));

    let entry = resources
        .enumerate()
        .map(|(i, resource)| BundleEntry {
            full_url: format!("{ENTRY_URL_PREFIX}{}", i + 1),
            resource,
        })
        .collect();

    Bundle {
        id: Uuid::new_v4().to_string(),
        kind: BundleType::Collection,
        timestamp: format_instant(built_at),
        entry,
    }
}
