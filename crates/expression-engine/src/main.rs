//! 表达式引擎命令行工具
//!
//! 配置从 config/{default,环境,expression-engine}.toml 与 EXPR_ 环境变量加载，
//! 命令行的日志级别覆盖配置文件。

use anyhow::{Context, Result};
use clap::Parser;
use expression_engine::cli::{Cli, CommandRunner};
use expression_shared::config::AppConfig;
use expression_shared::observability;

const SERVICE_NAME: &str = "expression-engine";

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(SERVICE_NAME).unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig {
            service_name: SERVICE_NAME.to_string(),
            ..Default::default()
        }
    });
    config.observability.log_level = cli.log_level.clone();

    observability::init(&config.service_name, &config.observability)
        .context("可观测性初始化失败")?;

    let mut runner = CommandRunner::new(&config.engine);
    let output = runner.run(&cli.command)?;
    println!("{}", output);

    Ok(())
}
