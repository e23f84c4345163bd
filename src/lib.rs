//! Scanned lab report → FHIR R4 collection bundle.
//!
//! The pipeline shells out to an OCR tool and a language-model tool, repairs
//! the model's JSON, and encodes the lab values as coded `Observation`s under
//! one `DiagnosticReport`.

pub mod config;
pub mod models;
pub mod pipeline;

pub use config::AppConfig;
pub use models::fhir::Bundle;
pub use models::LabRecord;
pub use pipeline::{LabPipeline, PipelineError, PipelineOutcome, PipelineStage};
