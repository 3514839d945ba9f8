//! 表达式编译器
//!
//! 将规则文本解析成可缓存的 [`CompiledExpression`]，同时预先提取规范文本、
//! 引用到的变量和推断单位，求值时不必再次遍历。

use chrono::{DateTime, Utc};
use expression_shared::config::EngineConfig;
use expression_shared::observability::metrics;
use std::collections::BTreeSet;
use tracing::{debug, instrument, warn};

use crate::env::DeclarationEnv;
use crate::error::Result;
use crate::expr::{Expr, ExprKind};
use crate::parser::{Parser, ParserOptions};
use crate::rewrite::infer_unit;
use crate::serializer::serialize;
use crate::units::Unit;

/// 编译后的表达式
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub id: String,
    /// 原始规则文本
    pub source: String,
    pub expr: Expr,
    /// 规范化文本，可直接写入缓存
    pub canonical: String,
    /// 表达式引用的所有变量名（不含函数名）
    pub unbound_variables: BTreeSet<String>,
    /// 推断出的结果单位
    pub unit: Option<Unit>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledExpression {
    /// 是否引用了指定变量
    pub fn references(&self, name: &str) -> bool {
        self.unbound_variables.contains(name)
    }
}

/// 表达式编译器
pub struct ExpressionCompiler {
    compile_version: u64,
    options: ParserOptions,
    declarations: Option<DeclarationEnv>,
}

impl ExpressionCompiler {
    pub fn new() -> Self {
        Self {
            compile_version: 0,
            options: ParserOptions::default(),
            declarations: None,
        }
    }

    /// 按引擎配置设置长度、深度限制
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            options: ParserOptions::from(config),
            ..Self::new()
        }
    }

    /// 方括号变量按声明环境校验
    pub fn with_declarations(mut self, declarations: DeclarationEnv) -> Self {
        self.declarations = Some(declarations);
        self
    }

    /// 当前编译版本号
    pub fn compile_version(&self) -> u64 {
        self.compile_version
    }

    /// 编译表达式，未指定 ID 时生成一个
    pub fn compile_anonymous(&mut self, source: &str) -> Result<CompiledExpression> {
        let id = uuid::Uuid::new_v4().to_string();
        self.compile(&id, source)
    }

    /// 编译表达式
    #[instrument(skip(self, source), fields(expression_id = %id))]
    pub fn compile(&mut self, id: &str, source: &str) -> Result<CompiledExpression> {
        let mut parser = Parser::new(source).with_options(self.options.clone());
        if let Some(declarations) = &self.declarations {
            parser = parser.with_declarations(declarations);
        }

        let expr = match parser.parse() {
            Ok(expr) => expr,
            Err(e) => {
                metrics::record_compilation(false);
                warn!(error = %e, "表达式编译失败");
                return Err(e);
            }
        };

        Ok(self.finish(id, source.to_string(), expr))
    }

    /// 从已有语法树编译（例如缓存中还原的树），源文本取规范形式
    pub fn compile_tree(&mut self, id: &str, expr: Expr) -> CompiledExpression {
        let source = serialize(&expr);
        self.finish(id, source, expr)
    }

    fn finish(&mut self, id: &str, source: String, expr: Expr) -> CompiledExpression {
        let mut unbound_variables = BTreeSet::new();
        collect_variables(&expr, &mut unbound_variables);

        self.compile_version += 1;
        metrics::record_compilation(true);

        let compiled = CompiledExpression {
            id: id.to_string(),
            source,
            canonical: serialize(&expr),
            unit: infer_unit(&expr),
            expr,
            unbound_variables,
            compile_version: self.compile_version,
            compiled_at: Utc::now(),
        };
        debug!(
            canonical = %compiled.canonical,
            variables = compiled.unbound_variables.len(),
            "表达式已编译"
        );
        compiled
    }
}

impl Default for ExpressionCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_variables(expr: &Expr, out: &mut BTreeSet<String>) {
    if let ExprKind::Variable(variable) = &expr.kind {
        out.insert(variable.full_name());
    }
    for child in expr.children() {
        collect_variables(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::DeclaredType;

    #[test]
    fn test_compile_extracts_metadata() {
        let mut compiler = ExpressionCompiler::new();
        let compiled = compiler
            .compile("power", "AVERAGE([zone temp], 1h) * 2kW + offset")
            .unwrap();

        assert_eq!(compiled.id, "power");
        assert_eq!(compiled.canonical, "AVERAGE([zone temp],1[h]) * 2[kW] + offset");
        assert_eq!(
            compiled.unbound_variables.iter().cloned().collect::<Vec<_>>(),
            vec!["offset".to_string(), "zone temp".to_string()]
        );
        assert!(compiled.references("offset"));
        assert!(!compiled.references("AVERAGE"));
        assert_eq!(compiled.unit.map(|u| u.name().to_string()), Some("kW".to_string()));
    }

    #[test]
    fn test_compile_version_increments() {
        let mut compiler = ExpressionCompiler::new();
        let first = compiler.compile("a", "1 + 1").unwrap();
        let second = compiler.compile("b", "x").unwrap();
        assert_eq!(first.compile_version, 1);
        assert_eq!(second.compile_version, 2);
        assert_eq!(compiler.compile_version(), 2);
    }

    #[test]
    fn test_failed_compile_keeps_version() {
        let mut compiler = ExpressionCompiler::new();
        let err = compiler.compile("bad", "1 +").unwrap_err();
        assert!(err.is_parse_error());
        assert_eq!(compiler.compile_version(), 0);
    }

    #[test]
    fn test_config_limits() {
        let config = EngineConfig {
            max_expression_length: 5,
            ..Default::default()
        };
        let mut compiler = ExpressionCompiler::from_config(&config);
        assert!(compiler.compile("short", "1 + 2").is_ok());
        assert!(compiler.compile("long", "1 + 2 + 3").is_err());
    }

    #[test]
    fn test_declarations() {
        let mut declarations = DeclarationEnv::new();
        declarations.add_variable("zone temp", DeclaredType::Number);
        let mut compiler = ExpressionCompiler::new().with_declarations(declarations);

        assert!(compiler.compile("ok", "[zone temp] > 20").is_ok());
        let err = compiler.compile("bad", "[zone humidity] > 20").unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");
    }

    #[test]
    fn test_compile_tree() {
        let mut compiler = ExpressionCompiler::new();
        let expr = crate::parser::parse("(a+1)*b").unwrap();
        let compiled = compiler.compile_tree("restored", expr);
        assert_eq!(compiled.source, "(a + 1) * b");
        assert_eq!(compiled.canonical, compiled.source);
        assert_eq!(compiled.unbound_variables.len(), 2);
    }

    #[test]
    fn test_anonymous_id() {
        let mut compiler = ExpressionCompiler::new();
        let compiled = compiler.compile_anonymous("1").unwrap();
        assert!(uuid::Uuid::parse_str(&compiled.id).is_ok());
    }
}
