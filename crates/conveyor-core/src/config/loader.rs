//! Topology file loading.

use std::path::Path;

use snafu::ResultExt;

use super::{TopologyConfig, interpolate, is_yaml_file};
use crate::error::{ConfigError, ReadFileSnafu, YamlParseSnafu};

/// Read, interpolate and parse a topology file.
pub fn load_file(path: &Path) -> Result<TopologyConfig, ConfigError> {
    if !is_yaml_file(path) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        });
    }

    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;

    let result = interpolate(&contents);
    if !result.is_ok() {
        return Err(ConfigError::EnvInterpolation {
            message: result
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        });
    }

    parse_yaml(&result.text)
}

/// Parse an already-interpolated topology document.
pub fn parse_yaml(contents: &str) -> Result<TopologyConfig, ConfigError> {
    serde_yaml::from_str(contents).context(YamlParseSnafu)
}
