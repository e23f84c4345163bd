use super::StructuringError;
use crate::config::PromptConfig;
use crate::pipeline::encoding::codes::OBSERVATION_SPECS;

pub const DEFAULT_INSTRUCTIONS: &str = r#"
You are a laboratory report transcription assistant. The text below was
produced by OCR from a scanned lab report; table rows are flattened into lines.

RULES (ABSOLUTE, NO EXCEPTIONS):
1. Extract ONLY values explicitly printed in the document.
2. Copy numeric results verbatim, without units and without reference ranges.
3. Use a dot as the decimal separator.
4. If a value is missing or unreadable, output an empty string "" for that field.
   Never write null.
5. The date is the sampling or report date in YYYY-MM-DD format.
6. Output exactly ONE JSON object matching the schema below and nothing else.
"#;

/// Instruction text plus target schema, assembled once at startup and shared
/// read-only by every pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    instructions: String,
    schema: String,
}

impl PromptTemplate {
    pub fn new(instructions: &str, schema: &str) -> Self {
        Self {
            instructions: instructions.trim().to_string(),
            schema: schema.trim().to_string(),
        }
    }

    /// Built-in instructions with the schema derived from the observation table.
    pub fn builtin() -> Self {
        Self::new(DEFAULT_INSTRUCTIONS, &default_schema())
    }

    /// Load instruction and schema overrides from the configured files,
    /// falling back to the built-in text for whichever is not set.
    pub fn from_config(config: &PromptConfig) -> Result<Self, StructuringError> {
        let instructions = match &config.instructions_path {
            Some(path) => std::fs::read_to_string(path)?,
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };
        let schema = match &config.schema_path {
            Some(path) => std::fs::read_to_string(path)?,
            None => default_schema(),
        };
        Ok(Self::new(&instructions, &schema))
    }

    /// Build the prompt for one document's OCR text.
    pub fn render(&self, table_text: &str) -> String {
        format!(
            "{instructions}\n\n<document>\n{table_text}\n</document>\n\nSCHEMA:\n{schema}\n",
            instructions = self.instructions,
            schema = self.schema,
        )
    }
}

/// JSON skeleton listing every field the model should fill.
pub fn default_schema() -> String {
    let mut schema = String::from("{\n");
    schema.push_str("  \"patient\": \"patient identifier or name, or empty\",\n");
    schema.push_str("  \"practitioner\": \"ordering physician, or empty\",\n");
    schema.push_str("  \"orderId\": \"order or request number, or empty\",\n");
    schema.push_str("  \"date\": \"YYYY-MM-DD, or empty\",\n");
    schema.push_str("  \"sex\": \"female | male, or empty\",\n");
    schema.push_str("  \"materials\": [\"sample material, e.g. Serum\"],\n");

    let last = OBSERVATION_SPECS.len().saturating_sub(1);
    for (i, spec) in OBSERVATION_SPECS.iter().enumerate() {
        let sep = if i == last { "" } else { "," };
        schema.push_str(&format!(
            "  \"{}\": \"{} in {}, or empty\"{}\n",
            spec.field, spec.display, spec.unit, sep
        ));
    }
    schema.push('}');
    schema
}
