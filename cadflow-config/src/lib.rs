use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// 指定配置文件路径的环境变量。
pub const CONFIG_ENV: &str = "CADFLOW_CONFIG";

/// 应用配置的根结构。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// 从显式路径加载配置。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 自动发现配置文件：优先读取环境变量 `CADFLOW_CONFIG`，否则寻找 `./config/default.toml`。
    /// 若文件缺失，则返回默认配置。
    pub fn discover() -> Result<Self, ConfigError> {
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_path = env::current_dir()
            .map(|dir| dir.join("config").join("default.toml"))
            .map_err(|source| ConfigError::Context {
                message: "获取当前工作目录失败".to_string(),
                source,
            })?;

        if default_path.exists() {
            Self::from_file(default_path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let distance = self.engine.link_distance;
        if !distance.is_finite() || distance < 0.0 {
            return Err(ConfigError::Invalid {
                field: "engine.link_distance",
                message: format!("吸附距离必须是非负有限数，实际为 {distance}"),
            });
        }
        Ok(())
    }
}

/// 日志配置，支持设置默认等级。
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

/// 操作引擎的输入设置。
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub vertex_snapping: bool,
    #[serde(default = "EngineConfig::default_link_distance")]
    pub link_distance: f64,
}

impl EngineConfig {
    fn default_link_distance() -> f64 {
        10.0
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vertex_snapping: false,
            link_distance: Self::default_link_distance(),
        }
    }
}

/// 撤销栈上限，0 表示不限。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub max_records: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_format_version")]
    pub format_version: String,
    #[serde(default)]
    pub default_directory: Option<PathBuf>,
}

impl StorageConfig {
    fn default_format_version() -> String {
        "1".to_string()
    }

    /// 相对路径按默认目录解析。
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match &self.default_directory {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            format_version: Self::default_format_version(),
            default_directory: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("读取配置文件 {path:?} 失败: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("解析配置文件 {path:?} 失败: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("配置项 {field} 无效: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_returned_when_file_missing() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.engine.vertex_snapping);
        assert_eq!(cfg.engine.link_distance, 10.0);
        assert_eq!(cfg.history.max_records, 0);
        assert_eq!(cfg.storage.format_version, "1");
        assert!(cfg.storage.default_directory.is_none());
    }

    #[test]
    fn load_from_temp_file() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(
            file,
            r#"
            [logging]
            level = "debug"

            [engine]
            vertex_snapping = true
            link_distance = 4.5

            [history]
            max_records = 50

            [storage]
            format_version = "2"
            default_directory = "../drawings"
            "#
        )
        .unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.engine.vertex_snapping);
        assert_eq!(cfg.engine.link_distance, 4.5);
        assert_eq!(cfg.history.max_records, 50);
        assert_eq!(cfg.storage.format_version, "2");
        assert_eq!(
            cfg.storage.resolve("a.cadflow"),
            PathBuf::from("../drawings").join("a.cadflow")
        );
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[engine]\nvertex_snapping = true\n").unwrap();

        let cfg = AppConfig::from_file(file.path()).expect("load config");
        assert!(cfg.engine.vertex_snapping);
        assert_eq!(cfg.engine.link_distance, 10.0);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.storage.resolve("x"), PathBuf::from("x"));
    }

    #[test]
    fn negative_link_distance_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[engine]\nlink_distance = -1.0\n").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "engine.link_distance",
                ..
            }
        ));
    }

    #[test]
    fn malformed_toml_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        writeln!(file, "[engine\nvertex_snapping = ").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
