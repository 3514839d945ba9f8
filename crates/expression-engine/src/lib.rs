//! 规则表达式引擎
//!
//! 提供规则文本的完整处理链路：
//! - 词法与语法分析，产出带单位标签的不可变语法树
//! - 基于访问者的求值、单位推断、规范化序列化
//! - 常量折叠、代数化简、符号求导、方程求解等树改写
//! - 时间序列函数（AVERAGE、DELTA、SLOPE 等）的时间窗口求值
//! - 编译结果缓存与缓存层编解码

pub mod cli;
pub mod codec;
pub mod compiler;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod functions;
pub mod lexer;
pub mod operators;
pub mod parser;
pub mod rewrite;
pub mod serializer;
pub mod store;
pub mod temporal;
pub mod units;
pub mod value;
pub mod visitor;

pub use compiler::{CompiledExpression, ExpressionCompiler};
pub use env::{DeclarationEnv, DeclaredType, Env, ValueEnv};
pub use error::{ExpressionError, ParseError, Result};
pub use evaluator::{Evaluator, evaluate, evaluate_with};
pub use expr::{Expr, ExprKind, Variable};
pub use operators::BinaryOperator;
pub use parser::{Parser, ParserOptions, parse, parse_declared};
pub use serializer::serialize;
pub use store::ExpressionStore;
pub use temporal::{TemporalObject, TemporalRegistry, TemporalSource, TimeSeries, TimeWindow};
pub use units::{TimeUnit, Unit, UnitRegistry, UnitValue};
pub use value::Value;
pub use visitor::{Rewriter, Visitor};
