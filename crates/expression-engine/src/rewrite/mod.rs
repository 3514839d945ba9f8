//! 树改写
//!
//! 每个改写器都返回新树，输入树保持不变：
//!
//! - [`ConstantOptimizer`]：常量折叠，保留单位
//! - [`Simplifier`]：代数恒等式化简
//! - [`Differentiator`]：符号求导（结果不再化简）
//! - [`Inverter`]：方程求解，把目标子表达式单独移到左边
//! - [`UnitInferer`]：不求值地推断结果单位

mod constant;
mod differentiate;
mod invert;
mod simplify;
mod units;

pub use constant::ConstantOptimizer;
pub use differentiate::Differentiator;
pub use invert::Inverter;
pub use simplify::Simplifier;
pub use units::{UnitEnv, UnitInferer};

use crate::error::Result;
use crate::expr::Expr;
use crate::units::Unit;

/// 常量折叠
pub fn optimize(expr: &Expr) -> Result<Expr> {
    expr.rewrite(&mut ConstantOptimizer)
}

/// 代数化简
pub fn simplify(expr: &Expr) -> Result<Expr> {
    expr.rewrite(&mut Simplifier)
}

/// 对 `variable` 求导
pub fn differentiate(expr: &Expr, variable: &str) -> Result<Expr> {
    expr.rewrite(&mut Differentiator::new(variable))
}

/// 从等式 `equation` 中解出 `target`
pub fn invert(equation: &Expr, target: &Expr) -> Result<Expr> {
    Inverter::solve(equation, target)
}

/// 推断表达式的结果单位
pub fn infer_unit(expr: &Expr) -> Option<Unit> {
    expr.accept(&mut UnitInferer::new())
}
