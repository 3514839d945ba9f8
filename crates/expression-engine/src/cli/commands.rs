//! CLI 命令定义
//!
//! 使用 clap derive 宏定义命令行接口结构，每个子命令读取一条表达式文本。

use clap::{Parser, Subcommand};

/// 表达式引擎命令行工具
#[derive(Parser, Debug)]
#[command(name = "expr")]
#[command(version, about = "规则表达式解析、求值与变换工具")]
#[command(propagate_version = true)]
pub struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)，RUST_LOG 优先
    #[arg(short, long, default_value = "warn", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// 子命令枚举
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 解析并输出规范文本
    Parse { text: String },

    /// 求值
    ///
    /// 变量值依次尝试按数值、布尔、ISO 8601 日期解析，都不匹配时作为字符串。
    Eval {
        text: String,

        /// 变量赋值，格式 name=value，可重复
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,
    },

    /// 代数化简
    Simplify { text: String },

    /// 常量折叠
    Optimize { text: String },

    /// 对变量求导（结果不化简）
    Derive {
        text: String,

        /// 求导变量
        #[arg(long)]
        wrt: String,
    },

    /// 解等式
    Invert {
        text: String,

        /// 目标变量或子表达式
        #[arg(long)]
        target: String,
    },

    /// 推断结果单位
    Units { text: String },
}
