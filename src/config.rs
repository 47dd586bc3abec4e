use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_speed_factor")]
    pub speed_factor: f32,
    #[serde(default)]
    pub start_paused: bool,
    #[serde(default)]
    pub hot_reload: bool,
    #[serde(default)]
    pub main_script: Option<PathBuf>,
    #[serde(default = "SchedulerConfig::default_event_capacity")]
    pub event_capacity: usize,
}

impl SchedulerConfig {
    const fn default_speed_factor() -> f32 {
        1.0
    }

    const fn default_event_capacity() -> usize {
        256
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(target: "scheduler", "Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            speed_factor: Self::default_speed_factor(),
            start_paused: false,
            hot_reload: false,
            main_script: None,
            event_capacity: Self::default_event_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: SchedulerConfig = serde_json::from_str(r#"{ "speed_factor": 2.0 }"#).expect("parse");
        assert_eq!(cfg.speed_factor, 2.0);
        assert!(!cfg.start_paused);
        assert!(cfg.main_script.is_none());
        assert_eq!(cfg.event_capacity, 256);
    }

    #[test]
    fn load_or_default_falls_back_on_bad_json() {
        let mut file = tempfile::NamedTempFile::new().expect("temp config");
        write!(file, "{{ not json").expect("write config");
        let cfg = SchedulerConfig::load_or_default(file.path());
        assert_eq!(cfg.speed_factor, 1.0);
        let err = SchedulerConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"), "error should carry context: {err}");
    }
}
