//! 命令执行器
//!
//! 把 CLI 子命令转成引擎调用，返回要打印的文本。

use anyhow::{Context, Result, bail};
use expression_shared::config::EngineConfig;
use tracing::debug;

use crate::compiler::{CompiledExpression, ExpressionCompiler};
use crate::env::ValueEnv;
use crate::evaluator::evaluate;
use crate::rewrite::{differentiate, invert, optimize, simplify};
use crate::serializer::serialize;
use crate::value::{Value, parse_datetime};

use super::commands::Commands;

/// 没有值时的输出
pub const NO_VALUE: &str = "<无值>";
/// 推断不出单位时的输出
pub const NO_UNIT: &str = "<无单位>";

pub struct CommandRunner {
    compiler: ExpressionCompiler,
}

impl CommandRunner {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            compiler: ExpressionCompiler::from_config(config),
        }
    }

    /// 执行子命令
    pub fn run(&mut self, command: &Commands) -> Result<String> {
        debug!(?command, "执行命令");
        match command {
            Commands::Parse { text } => Ok(self.compile(text)?.canonical),
            Commands::Eval { text, vars } => self.run_eval(text, vars),
            Commands::Simplify { text } => {
                let compiled = self.compile(text)?;
                Ok(serialize(&simplify(&compiled.expr)?))
            }
            Commands::Optimize { text } => {
                let compiled = self.compile(text)?;
                Ok(serialize(&optimize(&compiled.expr)?))
            }
            Commands::Derive { text, wrt } => {
                let compiled = self.compile(text)?;
                let derivative = differentiate(&compiled.expr, wrt)
                    .with_context(|| format!("无法对 {} 求导", wrt))?;
                Ok(serialize(&derivative))
            }
            Commands::Invert { text, target } => {
                let equation = self.compile(text)?;
                let target = self.compile(target)?;
                Ok(serialize(&invert(&equation.expr, &target.expr)?))
            }
            Commands::Units { text } => Ok(self
                .compile(text)?
                .unit
                .map(|unit| unit.name().to_string())
                .unwrap_or_else(|| NO_UNIT.to_string())),
        }
    }

    fn run_eval(&mut self, text: &str, vars: &[String]) -> Result<String> {
        let compiled = self.compile(text)?;

        let mut env = ValueEnv::new();
        for assignment in vars {
            let (name, value) = parse_assignment(assignment)?;
            env.assign(name, value);
        }

        let value = evaluate(&compiled.expr, &env)
            .with_context(|| format!("求值失败: {}", compiled.canonical))?;
        Ok(value.map_or_else(|| NO_VALUE.to_string(), |v| v.to_string()))
    }

    fn compile(&mut self, text: &str) -> Result<CompiledExpression> {
        self.compiler
            .compile_anonymous(text)
            .with_context(|| format!("无法解析表达式: {}", text))
    }
}

/// 解析 `name=value`
///
/// 值依次尝试数值、布尔、日期，都不匹配时作为字符串，两侧的引号会被去掉。
pub fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    let Some((name, raw)) = assignment.split_once('=') else {
        bail!("变量赋值格式应为 name=value: {}", assignment);
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("变量名不能为空: {}", assignment);
    }

    let raw = raw.trim();
    let value = if let Ok(n) = raw.parse::<f64>() {
        Value::Number(n)
    } else if raw.eq_ignore_ascii_case("true") {
        Value::Bool(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Value::Bool(false)
    } else if let Some(date) = parse_datetime(raw) {
        Value::Date(date)
    } else {
        let unquoted = raw
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(raw);
        Value::String(unquoted.to_string())
    };
    Ok((name.to_string(), value))
}
