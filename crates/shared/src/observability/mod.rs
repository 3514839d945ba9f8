//! 统一可观测性模块
//!
//! 提供日志与指标名称的统一初始化和管理。
//! 引擎与命令行工具通过单一入口点配置可观测性，确保一致的指标命名。

pub mod metrics;
pub mod tracing;

use ::tracing::info;

use crate::config::ObservabilityConfig;
use crate::error::Result;

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（仅注册指标描述，recorder 由宿主进程安装）
///
/// # Example
///
/// ```ignore
/// use expression_shared::config::AppConfig;
/// use expression_shared::observability;
///
/// let config = AppConfig::load("expression-engine")?;
/// observability::init(&config.service_name, &config.observability)?;
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<()> {
    tracing::init(config)?;

    if config.metrics_enabled {
        metrics::describe_all(service_name);
    }

    info!(
        service = %service_name,
        log_format = %config.log_format,
        metrics_enabled = config.metrics_enabled,
        "Observability initialized"
    );

    Ok(())
}
