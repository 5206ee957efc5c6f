use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Placement of a session's model on hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    #[default]
    Cpu,
    /// CUDA GPU by ordinal
    Cuda(u32),
}

impl Device {
    pub fn is_gpu(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }

    /// Check the placement against the number of GPUs the engine can see.
    ///
    /// Runs at session creation so an unusable device never surfaces lazily
    /// at the first prediction.
    pub fn validate(&self, gpu_count: usize) -> Result<()> {
        match *self {
            Device::Cpu => Ok(()),
            Device::Cuda(_) if gpu_count == 0 => Err(Error::InvalidDevice(format!(
                "{} requested but no GPU is available",
                self
            ))),
            Device::Cuda(index) if index as usize >= gpu_count => Err(Error::InvalidDevice(format!(
                "{} requested but only {} GPU(s) are available",
                self, gpu_count
            ))),
            Device::Cuda(_) => Ok(()),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let (kind, index) = match lowered.split_once(':') {
            Some((kind, index)) => (kind, Some(index)),
            None => (lowered.as_str(), None),
        };

        match (kind, index) {
            ("cpu", None) => Ok(Device::Cpu),
            ("cuda" | "gpu", None) => Ok(Device::Cuda(0)),
            ("cuda" | "gpu", Some(index)) => index
                .parse::<u32>()
                .map(Device::Cuda)
                .map_err(|_| Error::InvalidDevice(format!("bad GPU ordinal in '{}'", s))),
            _ => Err(Error::InvalidDevice(format!("unrecognized device '{}'", s))),
        }
    }
}

impl TryFrom<String> for Device {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}
