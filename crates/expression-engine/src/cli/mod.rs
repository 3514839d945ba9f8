//! CLI 模块
//!
//! 提供命令行接口，支持以下功能：
//!
//! - `parse` - 输出规范文本
//! - `eval` - 在给定变量上求值
//! - `simplify` / `optimize` - 代数化简与常量折叠
//! - `derive` - 符号求导
//! - `invert` - 解等式
//! - `units` - 推断结果单位
//!
//! # 使用示例
//!
//! ```bash
//! expr parse "(1+(2+3))*x"
//! expr eval "a * 2 > b" --var a=6 --var b=10
//! expr derive "x^2 + 3*x" --wrt x
//! expr invert "a * x + b == c" --target x
//! expr units "5W * 10s"
//! ```

pub mod commands;
pub mod runner;

pub use commands::{Cli, Commands};
pub use runner::CommandRunner;
