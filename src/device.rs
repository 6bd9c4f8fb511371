use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum DeviceType {
    #[default]
    Cpu,
    Cuda,
}

/// The device a tensor's values will live on once the graph is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub struct Device {
    pub device_type: DeviceType,
    pub ordinal: u32,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParseDeviceError {
    #[error("Unknown device type: {0}")]
    UnknownType(String),
    #[error("Invalid device ordinal: {0}")]
    InvalidOrdinal(String),
}

impl Device {
    pub const fn cpu() -> Self {
        Device {
            device_type: DeviceType::Cpu,
            ordinal: 0,
        }
    }

    pub const fn cuda(ordinal: u32) -> Self {
        Device {
            device_type: DeviceType::Cuda,
            ordinal,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.device_type {
            DeviceType::Cpu => "CPU",
            DeviceType::Cuda => "CUDA",
        };
        write!(f, "{name}:{}", self.ordinal)
    }
}

/// Parses `cpu`, `cpu:0`, `cuda:1`, etc. Case-insensitive.
impl FromStr for Device {
    type Err = ParseDeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let (type_str, ordinal_str) = match lowered.split_once(':') {
            Some((t, o)) => (t, Some(o)),
            None => (lowered.as_str(), None),
        };
        let device_type = match type_str {
            "cpu" => DeviceType::Cpu,
            "cuda" | "gpu" => DeviceType::Cuda,
            _ => return Err(ParseDeviceError::UnknownType(type_str.to_owned())),
        };
        let ordinal = match ordinal_str {
            Some(o) => o
                .parse()
                .map_err(|_| ParseDeviceError::InvalidOrdinal(o.to_owned()))?,
            None => 0,
        };
        Ok(Device {
            device_type,
            ordinal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::cpu());
        assert_eq!("CUDA:1".parse::<Device>().unwrap(), Device::cuda(1));
        assert_eq!(
            "tpu:0".parse::<Device>(),
            Err(ParseDeviceError::UnknownType("tpu".to_owned()))
        );
        assert_eq!(
            "cuda:x".parse::<Device>(),
            Err(ParseDeviceError::InvalidOrdinal("x".to_owned()))
        );
    }

    #[test]
    fn test_display_parses_back() {
        let device = Device::cuda(3);
        assert_eq!(device.to_string(), "CUDA:3");
        assert_eq!(device.to_string().parse::<Device>().unwrap(), device);
    }
}
