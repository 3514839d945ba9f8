//! 共享库
//!
//! 包含表达式引擎与其命令行工具共用的配置、错误处理和可观测性基础设施代码。

pub mod config;
pub mod error;
pub mod observability;
