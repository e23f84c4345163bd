pub mod fhir;
pub mod lab;

pub use lab::{LabRecord, ReportedValue};
