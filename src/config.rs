use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::device::Device;
use crate::error::{Error, Result};

/// Verbosity of the telemetry a session produces.
///
/// Levels are ordered; each level includes everything below it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Display, EnumString,
    Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    #[default]
    None,
    Application,
    Model,
    Framework,
    SystemLibrary,
    Hardware,
    Full,
}

impl TraceLevel {
    /// Engine profiling and per-call windows are recorded from this level up
    pub fn traces_framework(&self) -> bool {
        *self >= TraceLevel::Framework
    }

    /// Hardware counters are captured around each prediction from this level up
    pub fn captures_counters(&self) -> bool {
        *self >= TraceLevel::SystemLibrary
    }
}

fn default_batch_size() -> usize {
    1
}

/// Options for creating a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Path to the model file
    pub model_path: PathBuf,
    /// Device placement
    #[serde(default)]
    pub device: Device,
    /// Number of items per prediction, informational for the engine
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub trace_level: TraceLevel,
    /// Hardware counter names to capture around each prediction
    #[serde(default)]
    pub gpu_metrics: Vec<String>,
}

/// Document shape accepted by `from_json_str`; the device stays a string so
/// an unknown device reports `InvalidDevice` rather than a parse failure.
#[derive(Deserialize)]
struct OptionsDocument {
    model_path: PathBuf,
    #[serde(default)]
    device: Option<String>,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default)]
    trace_level: TraceLevel,
    #[serde(default)]
    gpu_metrics: Vec<String>,
}

impl SessionOptions {
    /// Create options for a model with CPU placement and tracing disabled
    pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            device: Device::Cpu,
            batch_size: default_batch_size(),
            trace_level: TraceLevel::None,
            gpu_metrics: Vec::new(),
        }
    }

    /// Set device placement
    pub fn set_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Set batch size
    pub fn set_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set trace level
    pub fn set_trace_level(mut self, trace_level: TraceLevel) -> Self {
        self.trace_level = trace_level;
        self
    }

    /// Set the hardware counters to capture
    pub fn set_gpu_metrics<I, S>(mut self, metrics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gpu_metrics = metrics.into_iter().map(Into::into).collect();
        self
    }

    /// Whether profiler windows are recorded
    pub fn trace_enabled(&self) -> bool {
        self.trace_level.traces_framework()
    }

    /// Load options from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: OptionsDocument =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;

        let device = match document.device {
            Some(text) => text.parse()?,
            None => Device::Cpu,
        };
        if document.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }

        Ok(Self {
            model_path: document.model_path,
            device,
            batch_size: document.batch_size,
            trace_level: document.trace_level,
            gpu_metrics: document.gpu_metrics,
        })
    }

    /// Load options from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
