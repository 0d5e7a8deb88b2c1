//! # Device Selection
//!
//! Picks the compute device (CPU/GPU) both speech models are loaded on.
//! A requested GPU that is not available falls back to the CPU with a warning
//! instead of failing startup.

use candle_core::Device;
use tracing::{debug, info, warn};

/// Device preferences for model inference (the `models.device` setting)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// Use a GPU when one is available, otherwise the CPU
    #[default]
    Auto,
    Cpu,
    /// CUDA GPU 0, falling back to the CPU
    Cuda,
    /// Metal GPU 0 (Apple Silicon), falling back to the CPU
    Metal,
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

fn cuda_device() -> Option<Device> {
    match Device::new_cuda(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("CUDA not available: {}", e);
            None
        }
    }
}

fn metal_device() -> Option<Device> {
    match Device::new_metal(0) {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Metal not available: {}", e);
            None
        }
    }
}

/// Resolve a preference to a concrete device.
pub fn select_device(preference: DevicePreference) -> Device {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Auto => cuda_device().or_else(metal_device).unwrap_or(Device::Cpu),
        DevicePreference::Cuda => cuda_device().unwrap_or_else(|| {
            warn!("CUDA requested but not available, using CPU");
            Device::Cpu
        }),
        DevicePreference::Metal => metal_device().unwrap_or_else(|| {
            warn!("Metal requested but not available, using CPU");
            Device::Cpu
        }),
    };
    info!("Using {} for ML inference", describe(&device));
    device
}

/// Parse the configured preference and resolve it. Unknown values mean `auto`.
pub fn create_device_from_string(device_str: &str) -> Device {
    let preference = device_str.parse::<DevicePreference>().unwrap_or_else(|e| {
        warn!("{}, using auto", e);
        DevicePreference::Auto
    });
    select_device(preference)
}

/// Short name for logs and the health endpoint.
pub fn describe(device: &Device) -> String {
    match device {
        Device::Cpu => "CPU".to_string(),
        Device::Cuda(_) => "CUDA GPU".to_string(),
        Device::Metal(_) => "Metal GPU (Apple Silicon)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_cpu_is_always_available() {
        let device = select_device(DevicePreference::Cpu);
        assert!(matches!(device, Device::Cpu));
        assert_eq!(describe(&device), "CPU");
    }

    #[test]
    fn test_unknown_preference_still_yields_a_device() {
        let device = create_device_from_string("quantum");
        assert!(!describe(&device).is_empty());
    }
}
