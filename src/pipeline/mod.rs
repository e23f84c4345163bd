pub mod process; // External OCR / language-model tool runner
pub mod structuring;
pub mod encoding; // LabRecord → FHIR Observations, DiagnosticReport, Bundle
pub mod processor;
pub mod diagnostic; // Intermediate artifact dump (LAB_BUNDLE_DUMP_DIR)

pub use processor::{LabPipeline, PipelineError, PipelineOutcome, PipelineStage};
