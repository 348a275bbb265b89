//! Engine configuration and override merging.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default mount point for origin-private persistent storage.
pub const DEFAULT_PERSISTENT_MOUNT: &str = "/user-files";

/// Default scratch directory for per-invocation temporary files.
pub const DEFAULT_SCRATCH_DIR: &str = "/temp";

/// Default fraction of initial memory above which usage is reported as high.
pub const DEFAULT_MEMORY_WARNING_RATIO: f64 = 0.85;

/// Configuration for one engine instance.
///
/// Keys the shim does not recognise are kept in [`passthrough`](Self::passthrough)
/// and handed to the engine factory untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Virtual path where persistent storage is mounted.
    pub persistent_mount: String,
    /// Virtual path of the scratch directory.
    pub scratch_dir: String,
    /// `argv[0]` used when the engine needs manual argv marshaling.
    pub program_name: String,
    /// High-water fraction for memory warnings.
    pub memory_warning_ratio: f64,
    /// Unrecognised keys forwarded to the engine factory.
    #[serde(flatten)]
    pub passthrough: Map<String, Value>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persistent_mount: DEFAULT_PERSISTENT_MOUNT.to_string(),
            scratch_dir: DEFAULT_SCRATCH_DIR.to_string(),
            program_name: "ffmpeg".to_string(),
            memory_warning_ratio: DEFAULT_MEMORY_WARNING_RATIO,
            passthrough: Map::new(),
        }
    }
}

impl EngineConfig {
    /// Shallow-merge caller overrides into this configuration.
    ///
    /// Top-level keys in `overrides` replace the existing value. `null` means
    /// no overrides; any other non-object value is rejected.
    pub fn with_overrides(&self, overrides: &Value) -> Result<Self> {
        let patch = match overrides {
            Value::Null => return Ok(self.clone()),
            Value::Object(map) => map,
            other => {
                return Err(Error::Config(format!(
                    "overrides must be an object, got {}",
                    json_type_name(other)
                )))
            }
        };

        let mut merged = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for (key, value) in patch {
            merged.insert(key.clone(), value.clone());
        }

        let config: EngineConfig = serde_json::from_value(Value::Object(merged))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that paths and thresholds are usable.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("persistentMount", &self.persistent_mount),
            ("scratchDir", &self.scratch_dir),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "{name} must be an absolute path, got '{path}'"
                )));
            }
        }
        if self.persistent_mount == self.scratch_dir {
            return Err(Error::Config(
                "persistentMount and scratchDir must differ".to_string(),
            ));
        }
        if !(self.memory_warning_ratio > 0.0 && self.memory_warning_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "memoryWarningRatio must be in (0, 1], got {}",
                self.memory_warning_ratio
            )));
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
