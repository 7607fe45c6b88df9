use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::VidLinkError;
use crate::types::Resolution;

/// Default capacity of the decoded frame queue.
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 5;

/// Receiver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Subscribe to track and frame callbacks as soon as the peer connection
    /// is initialized.
    #[serde(alias = "autoPlay", alias = "autoPlayOnAdded")]
    pub auto_play: bool,
    #[serde(alias = "frameQueueCapacity")]
    pub frame_queue_capacity: usize,
    /// Period of the consumer update loop.
    #[serde(alias = "tickIntervalMs")]
    pub tick_interval_ms: u64,
    /// Length of the rolling window used for frame queue rates.
    #[serde(alias = "statsWindowMs")]
    pub stats_window_ms: u64,
    #[serde(alias = "simulatedFPS", alias = "simulatedFps")]
    pub simulated_fps: u32,
    #[serde(alias = "simulatedResolution")]
    pub simulated_resolution: Resolution,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            auto_play: true,
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            tick_interval_ms: 16,
            stats_window_ms: 1000,
            simulated_fps: 30,
            simulated_resolution: Resolution::NHD,
        }
    }
}

impl ReceiverConfig {
    /// Reads and validates a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VidLinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        debug!("Loaded receiver config from {}: {:?}", path.display(), cfg);
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), VidLinkError> {
        let invalid = |reason: &str| {
            Err(VidLinkError::ConfigurationInvalid { reason: reason.to_owned() })
        };
        if self.frame_queue_capacity == 0 {
            return invalid("frame_queue_capacity must be at least 1");
        }
        if self.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be non-zero");
        }
        if self.stats_window_ms == 0 {
            return invalid("stats_window_ms must be non-zero");
        }
        if self.simulated_fps == 0 {
            return invalid("simulated_fps must be non-zero");
        }
        if self.simulated_resolution.is_empty() {
            return invalid("simulated_resolution must be non-empty");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::from_millis(self.stats_window_ms)
    }

    /// Interval between simulated frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.simulated_fps.max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ReceiverConfig::default();
        assert!(cfg.auto_play);
        assert_eq!(cfg.frame_queue_capacity, 5);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserializes_camel_case_fields() {
        let json = r#"{
            "autoPlayOnAdded": false,
            "frameQueueCapacity": 8,
            "tickIntervalMs": 33,
            "simulatedFPS": 60,
            "simulatedResolution": {"width": 1280, "height": 720}
        }"#;

        let cfg: ReceiverConfig = serde_json::from_str(json).expect("valid camelCase config");
        assert!(!cfg.auto_play);
        assert_eq!(cfg.frame_queue_capacity, 8);
        assert_eq!(cfg.tick_interval_ms, 33);
        assert_eq!(cfg.simulated_fps, 60);
        assert_eq!(cfg.simulated_resolution, Resolution::HD);
        // Unspecified fields keep their defaults
        assert_eq!(cfg.stats_window_ms, 1000);
    }

    #[test]
    fn deserializes_snake_case_fields() {
        let json = r#"{ "auto_play": true, "frame_queue_capacity": 3 }"#;

        let cfg: ReceiverConfig = serde_json::from_str(json).expect("valid snake_case config");
        assert!(cfg.auto_play);
        assert_eq!(cfg.frame_queue_capacity, 3);
    }

    #[test]
    fn rejects_zero_capacity() {
        let cfg = ReceiverConfig { frame_queue_capacity: 0, ..Default::default() };
        assert!(matches!(
            cfg.validate(),
            Err(VidLinkError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn rejects_empty_resolution() {
        let cfg = ReceiverConfig {
            simulated_resolution: Resolution::new(0, 0),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_and_validates_file() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("vidlink-config-{}.json", std::process::id()));
        std::fs::write(&good, r#"{ "autoPlay": false, "tickIntervalMs": 8 }"#).unwrap();
        let cfg = ReceiverConfig::from_file(&good).unwrap();
        assert!(!cfg.auto_play);
        assert_eq!(cfg.tick_interval_ms, 8);

        std::fs::write(&good, r#"{ "frameQueueCapacity": 0 }"#).unwrap();
        assert!(matches!(
            ReceiverConfig::from_file(&good),
            Err(VidLinkError::ConfigurationInvalid { .. })
        ));

        std::fs::write(&good, "not json").unwrap();
        assert!(matches!(ReceiverConfig::from_file(&good), Err(VidLinkError::Json(_))));
        std::fs::remove_file(&good).unwrap();

        assert!(matches!(ReceiverConfig::from_file(&good), Err(VidLinkError::Io(_))));
    }

    #[test]
    fn frame_interval_from_fps() {
        let cfg = ReceiverConfig { simulated_fps: 50, ..Default::default() };
        assert_eq!(cfg.frame_interval(), Duration::from_millis(20));
    }
}
