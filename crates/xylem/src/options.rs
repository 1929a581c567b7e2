//! Pipeline-wide options.

use crate::context::TranslationMode;
use crate::pipeline::{detect_format, parse_document, render_document};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Options shared by every transform of a pipeline run.
///
/// Unknown keys are kept in `extra` and handed to sources untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub job_name: String,

    /// Default parallelism of the execution environment.
    pub parallelism: Option<usize>,

    /// Upper bound for operator parallelism; `None` or 0 means unset.
    pub max_parallelism: Option<usize>,

    /// Shape outputs with wire coders for cross-runtime consumers.
    pub portable: bool,

    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            job_name: "xylem-job".to_string(),
            parallelism: None,
            max_parallelism: None,
            portable: false,
            extra: IndexMap::new(),
        }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = Some(max_parallelism);
        self
    }

    pub fn portable(mut self, portable: bool) -> Self {
        self.portable = portable;
        self
    }

    pub fn mode(&self) -> TranslationMode {
        if self.portable {
            TranslationMode::Portable
        } else {
            TranslationMode::Legacy
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.parallelism == Some(0) {
            return Err(OptionsError::Invalid("parallelism must be positive".into()));
        }
        if let (Some(parallelism), Some(max)) = (self.parallelism, self.max_parallelism) {
            if max > 0 && max < parallelism {
                return Err(OptionsError::Invalid(format!(
                    "max_parallelism {} is below parallelism {}",
                    max, parallelism
                )));
            }
        }
        if self.job_name.is_empty() {
            return Err(OptionsError::Invalid("job_name must not be empty".into()));
        }
        Ok(())
    }

    /// Parse options from bytes, detecting the format from the path.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, OptionsError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "toml".to_string());

        Self::from_bytes_format(data, &format)
    }

    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, OptionsError> {
        let options: PipelineOptions = parse_document(data, format).map_err(OptionsError::Parse)?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, OptionsError> {
        render_document(self, format).map_err(OptionsError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("failed to parse pipeline options: {0}")]
    Parse(String),

    #[error("invalid pipeline options: {0}")]
    Invalid(String),
}
