//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, SharedError};

/// 表达式引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 单条表达式允许的最大字符数
    pub max_expression_length: usize,
    /// 语法树最大嵌套深度
    pub max_depth: usize,
    /// 表达式存储的预分配容量
    pub store_capacity_hint: usize,
    /// 提供声明环境时是否校验方括号变量名
    pub validate_bracketed_names: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_expression_length: 16 * 1024,
            max_depth: 256,
            store_capacity_hint: 64,
            validate_bracketed_names: true,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ObservabilityConfig {
    /// 是否输出 JSON 格式日志
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（EXPR_ 前缀，如 EXPR_ENGINE__MAX_DEPTH -> engine.max_depth）
    ///
    /// 配置目录取自 CONFIG_DIR，默认为 `config`。
    pub fn load(service_name: &str) -> Result<Self> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
        Self::load_from(Path::new(&config_dir), service_name)
    }

    /// 从指定目录加载配置，加载顺序同 [`AppConfig::load`]
    pub fn load_from(config_dir: &Path, service_name: &str) -> Result<Self> {
        let env = std::env::var("EXPR_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            // 字段名自身含下划线，层级之间用双下划线分隔
            .add_source(
                Environment::with_prefix("EXPR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// 校验配置取值
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_depth == 0 {
            return Err(SharedError::InvalidConfig {
                field: "engine.max_depth".to_string(),
                message: "必须大于 0".to_string(),
            });
        }
        if self.engine.max_expression_length == 0 {
            return Err(SharedError::InvalidConfig {
                field: "engine.max_expression_length".to_string(),
                message: "必须大于 0".to_string(),
            });
        }
        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.engine.max_depth, 256);
        assert_eq!(config.engine.max_expression_length, 16 * 1024);
        assert!(config.engine.validate_bracketed_names);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let config = AppConfig {
            engine: EngineConfig {
                max_depth: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_json_logs_switch() {
        let mut config = ObservabilityConfig::default();
        assert!(!config.json_logs());
        config.log_format = "JSON".to_string();
        assert!(config.json_logs());
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let dir = Path::new("/nonexistent-expression-config");
        let config = AppConfig::load_from(dir, "expression-engine").unwrap();
        assert_eq!(config.service_name, "expression-engine");
        assert_eq!(config.engine.max_depth, 256);
    }

    #[test]
    fn test_load_from_service_file() {
        let dir = std::env::temp_dir().join(format!("expression-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("expression-engine-test.toml"),
            "[engine]\nmax_depth = 32\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&dir, "expression-engine-test").unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(config.engine.max_depth, 32);
        assert_eq!(config.engine.store_capacity_hint, 64);
    }
}
