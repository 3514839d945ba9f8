//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("无效的配置项: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    // ==================== 可观测性错误 ====================
    #[error("日志初始化失败: {0}")]
    Observability(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Observability(_) => "OBSERVABILITY_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = SharedError::InvalidConfig {
            field: "engine.max_depth".to_string(),
            message: "must be positive".to_string(),
        };
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("engine.max_depth"));
    }

    #[test]
    fn test_observability_error_code() {
        let err = SharedError::Observability("already set".to_string());
        assert_eq!(err.code(), "OBSERVABILITY_ERROR");
    }
}
