use super::repair::repair;
use super::StructuringError;
use crate::models::LabRecord;

/// Parse an already-repaired JSON object into a lab record.
pub fn parse_lab_record(repaired: &str) -> Result<LabRecord, StructuringError> {
    serde_json::from_str(repaired)
        .map_err(|e| StructuringError::InvalidLabRecordJson(e.to_string()))
}

/// Repair raw model output and parse it. Returns the repaired text alongside
/// the record so callers can keep it for diagnostics.
pub fn parse_model_output(raw: &str) -> Result<(LabRecord, String), StructuringError> {
    let repaired = repair(raw)?;
    let record = parse_lab_record(&repaired)?;
    Ok((record, repaired))
}
