//! Lab record → FHIR encoding: coded observations, the report header that
//! references them, and the collection bundle that carries both.

pub mod bundle;
pub mod codes;
pub mod observation;
pub mod report;

pub use bundle::*;
pub use codes::{spec_for, ObservationSpec, OBSERVATION_SPECS};
pub use observation::*;
pub use report::*;

use chrono::{DateTime, SecondsFormat, Utc};

/// FHIR `instant` rendering used for identifiers, fallbacks and timestamps.
pub fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn instant_has_millis_and_zulu() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 8, 30, 0).unwrap();
        assert_eq!(format_instant(at), "2024-03-05T08:30:00.000Z");
    }
}
