//! Lab report pipeline orchestrator.
//!
//! Drives one document through OCR, prompting, the language model, JSON
//! repair, parsing and FHIR encoding. Two entry points: the full run from
//! the configured document, and `encode` for model output obtained
//! elsewhere. Stages run strictly in order with no retries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::fhir::Bundle;
use crate::pipeline::diagnostic;
use crate::pipeline::encoding::{assemble_bundle_at, build_report_at, map_observations_at};
use crate::pipeline::process::{ProcessError, ProcessRunner, ToolRunner};
use crate::pipeline::structuring::{
    parse_lab_record, repair, sanitize_ocr_text, PromptTemplate, StructuringError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extracting,
    Prompting,
    Interpreting,
    Repairing,
    Parsing,
    Mapping,
    Assembling,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Prompting => "prompting",
            Self::Interpreting => "interpreting",
            Self::Repairing => "repairing",
            Self::Parsing => "parsing",
            Self::Mapping => "mapping",
            Self::Assembling => "assembling",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal pipeline failures. An empty result is not one of them; see
/// [`PipelineOutcome::NoObservations`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No document configured for the OCR tool")]
    DocumentNotConfigured,

    #[error("OCR tool unavailable: {0}")]
    OcrUnavailable(#[source] ProcessError),

    #[error("Language model tool unavailable: {0}")]
    LlmUnavailable(#[source] ProcessError),

    #[error("No JSON object found in model output")]
    NoJsonObjectFound,

    #[error("Model output is not a valid lab record: {0}")]
    InvalidLabRecordJson(String),
}

impl PipelineError {
    /// Stage the run was in when it failed.
    pub fn stage(&self) -> PipelineStage {
        match self {
            Self::DocumentNotConfigured | Self::OcrUnavailable(_) => PipelineStage::Extracting,
            Self::LlmUnavailable(_) => PipelineStage::Interpreting,
            Self::NoJsonObjectFound => PipelineStage::Repairing,
            Self::InvalidLabRecordJson(_) => PipelineStage::Parsing,
        }
    }
}

impl From<StructuringError> for PipelineError {
    fn from(err: StructuringError) -> Self {
        match err {
            StructuringError::NoJsonObjectFound => Self::NoJsonObjectFound,
            StructuringError::InvalidLabRecordJson(msg) => Self::InvalidLabRecordJson(msg),
            other => Self::InvalidLabRecordJson(other.to_string()),
        }
    }
}

/// Successful end of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Bundle(Bundle),
    /// The record parsed but held no numeric lab value.
    NoObservations,
}

/// Shared, read-only pipeline. Safe to use from concurrent tasks; whether
/// the configured tools tolerate concurrent runs is up to the tools.
#[derive(Debug, Clone)]
pub struct LabPipeline<R = ProcessRunner> {
    config: AppConfig,
    prompt: Arc<PromptTemplate>,
    ocr: R,
    llm: R,
}

impl LabPipeline {
    /// Build the pipeline, loading prompt overrides once.
    pub fn new(config: AppConfig) -> Result<Self, StructuringError> {
        let prompt = PromptTemplate::from_config(&config.prompt)?;
        Ok(Self::with_prompt(config, Arc::new(prompt)))
    }

    pub fn with_prompt(config: AppConfig, prompt: Arc<PromptTemplate>) -> Self {
        let ocr = ProcessRunner::from_tool(&config.ocr);
        let llm = ProcessRunner::from_tool(&config.llm);
        LabPipeline::with_runners(config, prompt, ocr, llm)
    }
}

impl<R: ToolRunner> LabPipeline<R> {
    /// Pipeline over caller-supplied tool runners. Program names and
    /// arguments still come from `config`.
    pub fn with_runners(config: AppConfig, prompt: Arc<PromptTemplate>, ocr: R, llm: R) -> Self {
        Self {
            config,
            prompt,
            ocr,
            llm,
        }
    }

    /// Full run: OCR the configured document, ask the model, encode.
    ///
    /// Dropping the returned future kills any tool still running.
    pub async fn extract_and_encode(&self) -> Result<PipelineOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("lab_pipeline", run_id = %run_id, entry = "extract");
        self.run_extract(run_id).instrument(span).await
    }

    /// Encode model output obtained elsewhere, starting at repair.
    pub fn encode(&self, raw: &str) -> Result<PipelineOutcome, PipelineError> {
        let run_id = Uuid::new_v4();
        let _span = tracing::info_span!("lab_pipeline", run_id = %run_id, entry = "encode").entered();

        let dump = self.dump_dir(&run_id);
        if let Some(dir) = &dump {
            diagnostic::dump_text(dir, diagnostic::LLM_RESPONSE_FILE, raw);
        }
        self.encode_response(raw, dump.as_deref())
    }

    async fn run_extract(&self, run_id: Uuid) -> Result<PipelineOutcome, PipelineError> {
        let dump = self.dump_dir(&run_id);

        enter(PipelineStage::Extracting);
        let ocr_args = self.ocr_args()?;
        let table_text = self
            .ocr
            .run(&self.config.ocr.program, &ocr_args)
            .await
            .map_err(PipelineError::OcrUnavailable)?
            .join("\n");
        tracing::info!(chars = table_text.len(), "OCR text received");
        if let Some(dir) = &dump {
            diagnostic::dump_text(dir, diagnostic::OCR_TEXT_FILE, &table_text);
        }

        enter(PipelineStage::Prompting);
        let prompt = self.prompt.render(&sanitize_ocr_text(&table_text));
        if let Some(dir) = &dump {
            diagnostic::dump_text(dir, diagnostic::PROMPT_FILE, &prompt);
        }

        enter(PipelineStage::Interpreting);
        let mut llm_args = self.config.llm.args.clone();
        llm_args.push(prompt);
        let response = self
            .llm
            .run(&self.config.llm.program, &llm_args)
            .await
            .map_err(PipelineError::LlmUnavailable)?
            .join("\n");
        tracing::info!(chars = response.len(), "Model response received");
        if let Some(dir) = &dump {
            diagnostic::dump_text(dir, diagnostic::LLM_RESPONSE_FILE, &response);
        }

        self.encode_response(&response, dump.as_deref())
    }

    fn encode_response(
        &self,
        raw: &str,
        dump: Option<&Path>,
    ) -> Result<PipelineOutcome, PipelineError> {
        enter(PipelineStage::Repairing);
        let repaired = repair(raw)?;
        if let Some(dir) = dump {
            diagnostic::dump_text(dir, diagnostic::REPAIRED_FILE, &repaired);
        }

        enter(PipelineStage::Parsing);
        let record = parse_lab_record(&repaired)?;

        enter(PipelineStage::Mapping);
        let built_at = Utc::now();
        let observations = map_observations_at(&record, built_at);
        if observations.is_empty() {
            tracing::info!("No numeric lab values in record, no bundle built");
            return Ok(PipelineOutcome::NoObservations);
        }

        enter(PipelineStage::Assembling);
        let report = build_report_at(&record, &observations, built_at);
        let bundle = assemble_bundle_at(report, observations, built_at);
        if let Some(dir) = dump {
            diagnostic::dump_json(dir, diagnostic::BUNDLE_FILE, &bundle);
        }

        enter(PipelineStage::Done);
        tracing::info!(
            bundle_id = %bundle.id,
            observations = bundle.entry.len() - 1,
            "Lab bundle assembled"
        );
        Ok(PipelineOutcome::Bundle(bundle))
    }

    fn ocr_args(&self) -> Result<Vec<String>, PipelineError> {
        let tool = &self.config.ocr;
        if !tool.uses_document() {
            return Ok(tool.args.clone());
        }
        let document = self
            .config
            .document_path
            .as_ref()
            .ok_or(PipelineError::DocumentNotConfigured)?;
        Ok(tool.args_for(&document.to_string_lossy()))
    }

    fn dump_dir(&self, run_id: &Uuid) -> Option<PathBuf> {
        diagnostic::dump_dir_for(self.config.dump_dir.as_deref(), run_id)
    }
}

fn enter(stage: PipelineStage) {
    tracing::debug!(stage = %stage, "Pipeline stage");
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::config::ToolConfig;
    use crate::pipeline::encoding::codes::systems;

    /// Tool stand-in returning canned lines and recording the arguments of
    /// each call.
    #[derive(Debug, Default)]
    struct MockTool {
        output: Vec<String>,
        fail: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl MockTool {
        fn replying(lines: &[&str]) -> Self {
            Self {
                output: lines.iter().map(|l| l.to_string()).collect(),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn last_args(&self) -> Vec<String> {
            self.calls.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    impl ToolRunner for &MockTool {
        fn run(
            &self,
            program: &str,
            args: &[String],
        ) -> impl std::future::Future<Output = Result<Vec<String>, ProcessError>> + Send {
            self.calls.lock().unwrap().push(args.to_vec());
            let result = if self.fail {
                Err(ProcessError::Launch {
                    program: program.to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
            } else {
                Ok(self.output.clone())
            };
            async move { result }
        }
    }

    const GLUCOSE_RESPONSE: &str =
        r#"Bing: {"patient":"P1","date":"2024-01-01","glucose":"95","nonHdlCholesterol":"",}"#;

    fn pipeline(config: AppConfig) -> LabPipeline {
        LabPipeline::new(config).unwrap()
    }

    fn mocked<'a>(config: AppConfig, ocr: &'a MockTool, llm: &'a MockTool) -> LabPipeline<&'a MockTool> {
        LabPipeline::with_runners(config, Arc::new(PromptTemplate::builtin()), ocr, llm)
    }

    fn document_config() -> AppConfig {
        AppConfig {
            document_path: Some("/scans/report.png".into()),
            ..AppConfig::default()
        }
    }

    fn sh_tool(script: &str) -> ToolConfig {
        ToolConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout_secs: Some(10),
            merge_stderr: false,
        }
    }

    fn expect_bundle(outcome: PipelineOutcome) -> Bundle {
        match outcome {
            PipelineOutcome::Bundle(bundle) => bundle,
            PipelineOutcome::NoObservations => panic!("expected a bundle"),
        }
    }

    #[test]
    fn encode_single_glucose_value() {
        let outcome = pipeline(AppConfig::default())
            .encode(r#"{"patient":"P1","practitioner":"Dr X","date":"2024-01-01","glucose":"95"}"#)
            .unwrap();
        let bundle = expect_bundle(outcome);

        assert_eq!(bundle.entry.len(), 2);
        let report = bundle.report().unwrap();
        assert_eq!(report.result.len(), 1);
        assert_eq!(report.effective_date_time, "2024-01-01");

        let obs: Vec<_> = bundle.observations().collect();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].code.coding[0].code, "2345-7");
        assert_eq!(obs[0].code.coding[0].system, systems::LOINC);
        assert_eq!(obs[0].value_quantity.value, 95.0);
        assert_eq!(obs[0].value_quantity.unit, "mg/dl");
        assert_eq!(obs[0].value_quantity.system, systems::UCUM);
        assert_eq!(
            report.result[0].identifier.value,
            obs[0].primary_identifier().unwrap().value
        );
    }

    #[test]
    fn blank_last_field_as_prompted_still_encodes() {
        let outcome = pipeline(AppConfig::default())
            .encode(r#"{"patient":"P1","date":"2024-01-01","glucose":"95","nonHdlCholesterol":""}"#)
            .unwrap();
        assert_eq!(expect_bundle(outcome).entry.len(), 2);
    }

    #[test]
    fn encode_without_lab_values_is_no_observations() {
        let outcome = pipeline(AppConfig::default()).encode(r#"{"patient":"P1"}"#).unwrap();
        assert_eq!(outcome, PipelineOutcome::NoObservations);
    }

    #[test]
    fn encode_errors_carry_their_stage() {
        let p = pipeline(AppConfig::default());

        let err = p.encode("Bing: I could not read the document.").unwrap_err();
        assert!(matches!(err, PipelineError::NoJsonObjectFound));
        assert_eq!(err.stage(), PipelineStage::Repairing);

        let err = p.encode(r#"{"patient":"P1","glucose":null}"#).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidLabRecordJson(_)));
        assert_eq!(err.stage(), PipelineStage::Parsing);
    }

    #[test]
    fn missing_prompt_override_fails_construction() {
        let mut config = AppConfig::default();
        config.prompt.schema_path = Some("/nonexistent/lab-bundle/schema.json".into());
        assert!(matches!(LabPipeline::new(config), Err(StructuringError::Io(_))));
    }

    #[test]
    fn pipeline_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LabPipeline>();
    }

    #[tokio::test]
    async fn full_run_produces_bundle_and_dumps() {
        let tmp = tempfile::tempdir().unwrap();
        let dump_base = tmp.path().join("dump");
        let config = AppConfig {
            dump_dir: Some(dump_base.clone()),
            ..document_config()
        };
        let ocr = MockTool::replying(&["Parameter  Wert  Einheit", "Glukose    95    mg/dl"]);
        let llm = MockTool::replying(&[GLUCOSE_RESPONSE]);

        let bundle = expect_bundle(mocked(config, &ocr, &llm).extract_and_encode().await.unwrap());
        assert_eq!(bundle.entry.len(), 2);
        assert_eq!(bundle.observations().next().unwrap().value_quantity.value, 95.0);

        assert_eq!(ocr.last_args(), vec!["OCR.py", "/scans/report.png"]);
        let llm_args = llm.last_args();
        assert_eq!(llm_args[0], "GPT4FREE.py");
        assert!(llm_args.last().unwrap().contains("Glukose    95    mg/dl"));

        let runs: Vec<_> = std::fs::read_dir(&dump_base).unwrap().collect();
        assert_eq!(runs.len(), 1);
        let run_dir = runs[0].as_ref().unwrap().path();
        for file in [
            diagnostic::OCR_TEXT_FILE,
            diagnostic::PROMPT_FILE,
            diagnostic::LLM_RESPONSE_FILE,
            diagnostic::REPAIRED_FILE,
            diagnostic::BUNDLE_FILE,
        ] {
            assert!(run_dir.join(file).is_file(), "missing {file}");
        }
    }

    #[tokio::test]
    async fn model_without_values_yields_no_observations() {
        let ocr = MockTool::replying(&["Glukose 95 mg/dl"]);
        let llm = MockTool::replying(&[r#"{"patient":"P1","glucose":"n/a",}"#]);

        let outcome = mocked(document_config(), &ocr, &llm).extract_and_encode().await.unwrap();
        assert_eq!(outcome, PipelineOutcome::NoObservations);
    }

    #[tokio::test]
    async fn tool_failures_map_to_their_stage() {
        let ok = MockTool::replying(&["Glukose 95 mg/dl"]);
        let broken = MockTool::failing();

        let err = mocked(document_config(), &broken, &ok).extract_and_encode().await.unwrap_err();
        assert!(matches!(err, PipelineError::OcrUnavailable(ProcessError::Launch { .. })));
        assert_eq!(err.stage(), PipelineStage::Extracting);

        let err = mocked(document_config(), &ok, &broken).extract_and_encode().await.unwrap_err();
        assert!(matches!(err, PipelineError::LlmUnavailable(_)));
        assert_eq!(err.stage(), PipelineStage::Interpreting);
    }

    #[tokio::test]
    async fn document_placeholder_requires_document() {
        let ocr = MockTool::replying(&["unused"]);
        let llm = MockTool::replying(&[GLUCOSE_RESPONSE]);

        let err = mocked(AppConfig::default(), &ocr, &llm).extract_and_encode().await.unwrap_err();
        assert!(matches!(err, PipelineError::DocumentNotConfigured));
        assert!(ocr.calls.lock().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_ocr_tool_is_ocr_unavailable() {
        let mut config = document_config();
        config.ocr.program = "/nonexistent/lab-bundle-ocr".into();

        let err = pipeline(config).extract_and_encode().await.unwrap_err();
        assert!(matches!(err, PipelineError::OcrUnavailable(ProcessError::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_model_times_out() {
        let config = AppConfig {
            ocr: sh_tool("echo 'Glukose 95 mg/dl'"),
            llm: ToolConfig {
                timeout_secs: Some(1),
                ..sh_tool("sleep 30")
            },
            ..AppConfig::default()
        };

        let err = pipeline(config).extract_and_encode().await.unwrap_err();
        assert!(matches!(err, PipelineError::LlmUnavailable(ProcessError::TimedOut { .. })));
        assert_eq!(err.stage(), PipelineStage::Interpreting);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_run_kills_running_tool() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("ocr.pid");
        let mut ocr = sh_tool(r#"echo $$ > "$0"; exec sleep 30"#);
        ocr.timeout_secs = None;
        ocr.args.push(pid_file.to_string_lossy().into_owned());
        let config = AppConfig {
            ocr,
            ..AppConfig::default()
        };

        let p = pipeline(config);
        let run = tokio::time::timeout(Duration::from_secs(1), p.extract_and_encode()).await;
        assert!(run.is_err(), "run should still be waiting on the tool");

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        assert!(!pid.is_empty());

        // The killed child is reaped in the background.
        let mut alive = true;
        for _ in 0..50 {
            alive = process_alive(&pid).await;
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!alive, "tool {pid} still running after the run was dropped");
    }

    #[cfg(unix)]
    async fn process_alive(pid: &str) -> bool {
        tokio::process::Command::new("sh")
            .args(["-c", r#"kill -0 "$0" 2>/dev/null"#, pid])
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}
