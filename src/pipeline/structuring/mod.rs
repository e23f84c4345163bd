pub mod prompt;
pub mod parser;
pub mod repair;
pub mod sanitize;

pub use prompt::*;
pub use parser::*;
pub use repair::*;
pub use sanitize::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StructuringError {
    #[error("No JSON object found in model output")]
    NoJsonObjectFound,

    #[error("Repaired model output is not a valid lab record: {0}")]
    InvalidLabRecordJson(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
