use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::core::errors::{MemoError, Result};

/// Executor kinds this crate knows how to build
pub const SUPPORTED_EXECUTOR_KINDS: &[&str] = &["tokio"];

/// Configuration for the pool pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Location of the durable pool. `None` runs with the process pool only.
    #[serde(default)]
    pub named_pool: Option<PathBuf>,
    /// zstd level used for artifact records in the durable pool
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

fn default_compression_level() -> i32 {
    3
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            named_pool: None,
            compression_level: default_compression_level(),
        }
    }
}

impl CacheConfig {
    pub fn with_named_pool(path: impl Into<PathBuf>) -> Self {
        Self {
            named_pool: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=22).contains(&self.compression_level) {
            return Err(MemoError::configuration(format!(
                "compression_level must be between 1 and 22, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }
}

/// One executor definition in a parallel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorDefinition {
    pub label: String,
    #[serde(default = "default_executor_kind")]
    pub kind: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_executor_kind() -> String {
    "tokio".to_string()
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_executor_label() -> String {
    "default".to_string()
}

/// Parallel execution configuration: executors and action routing.
///
/// ```yaml
/// default_executor: default
/// executors:
///   - label: default
///     kind: tokio
///     max_workers: 4
///   - label: heavy
///     max_workers: 1
/// mapping:
///   dummy-plugin:split: heavy
/// ```
///
/// Mapping keys are either qualified action names (`namespace:action`) or bare
/// namespaces. Qualified keys win over namespace keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    #[serde(default = "default_executor_label")]
    pub default_executor: String,
    #[serde(default)]
    pub executors: Vec<ExecutorDefinition>,
    #[serde(default)]
    pub mapping: HashMap<String, String>,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            default_executor: default_executor_label(),
            executors: vec![ExecutorDefinition {
                label: default_executor_label(),
                kind: default_executor_kind(),
                max_workers: default_max_workers(),
            }],
            mapping: HashMap::new(),
        }
    }
}

impl ParallelConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MemoError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&contents)
    }

    /// Validates labels, kinds and routing targets
    pub fn validate(&self) -> Result<()> {
        let mut labels = HashSet::new();
        for def in &self.executors {
            if def.label.is_empty() {
                return Err(MemoError::configuration("executor label cannot be empty"));
            }
            if !labels.insert(def.label.as_str()) {
                return Err(MemoError::configuration(format!(
                    "duplicate executor label '{}'",
                    def.label
                )));
            }
            if def.max_workers == 0 {
                return Err(MemoError::configuration(format!(
                    "executor '{}' must allow at least one worker",
                    def.label
                )));
            }
            if !SUPPORTED_EXECUTOR_KINDS.contains(&def.kind.as_str()) {
                return Err(MemoError::configuration(format!(
                    "executor '{}' has unsupported kind '{}'",
                    def.label, def.kind
                )));
            }
        }

        if !labels.contains(self.default_executor.as_str()) {
            return Err(MemoError::configuration(format!(
                "default executor '{}' is not defined",
                self.default_executor
            )));
        }

        for (action, label) in &self.mapping {
            if !labels.contains(label.as_str()) {
                return Err(MemoError::configuration(format!(
                    "'{}' is mapped to undefined executor '{}'",
                    action, label
                )));
            }
        }

        Ok(())
    }

    /// Executor label to executor kind, as recorded alongside results
    pub fn executor_name_type_mapping(&self) -> HashMap<String, String> {
        self.executors
            .iter()
            .map(|def| (def.label.clone(), def.kind.clone()))
            .collect()
    }

    /// Validate and start the configured executors
    pub fn build(&self) -> Result<crate::executor::ExecutorSet> {
        crate::executor::ExecutorSet::from_config(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parallel_config_is_valid() {
        let config = ParallelConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.executor_name_type_mapping().get("default"),
            Some(&"tokio".to_string())
        );
    }

    #[test]
    fn test_parallel_config_from_yaml() {
        let yaml = r#"
default_executor: default
executors:
  - label: default
    max_workers: 2
  - label: heavy
    kind: tokio
    max_workers: 1
mapping:
  dummy-plugin:split: heavy
  other-plugin: default
"#;
        let config = ParallelConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.executors.len(), 2);
        assert_eq!(config.executors[0].kind, "tokio");
        assert_eq!(config.mapping.get("dummy-plugin:split"), Some(&"heavy".to_string()));
    }

    #[test]
    fn test_parallel_config_rejects_unknown_label() {
        let yaml = r#"
executors:
  - label: default
mapping:
  dummy-plugin:split: missing
"#;
        let err = ParallelConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, MemoError::Configuration { .. }));
    }

    #[test]
    fn test_parallel_config_rejects_bad_executors() {
        let mut config = ParallelConfig::default();
        config.executors[0].max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = ParallelConfig::default();
        config.executors[0].kind = "htex".into();
        assert!(config.validate().is_err());

        let mut config = ParallelConfig::default();
        config.executors.push(config.executors[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        let config = CacheConfig {
            compression_level: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
