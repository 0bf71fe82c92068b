//! Command line arguments.

use std::path::{Path, PathBuf};

use clap::Parser;

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "yaml" || ext == "yml")
        .unwrap_or(false)
}

#[derive(Parser, Debug)]
#[command(version, about = "Run a declarative queue-based worker pipeline")]
pub struct CliArgs {
    /// Path to the topology file
    #[arg(short, long)]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_yaml_file() {
        assert!(is_yaml_file(Path::new("pipeline.yaml")));
        assert!(is_yaml_file(Path::new("pipeline.yml")));
        assert!(!is_yaml_file(Path::new("pipeline.toml")));
        assert!(!is_yaml_file(Path::new("pipeline")));
    }

    #[test]
    fn test_parse_config_flag() {
        let args = CliArgs::parse_from(["conveyor", "--config", "pipelines/demo.yaml"]);
        assert_eq!(args.config, PathBuf::from("pipelines/demo.yaml"));

        let short = CliArgs::parse_from(["conveyor", "-c", "p.yml"]);
        assert_eq!(short.config, PathBuf::from("p.yml"));
    }
}
