//! 代数化简
//!
//! 自底向上应用一组固定的恒等式，不做多项式规范化：
//!
//! | 形式 | 结果 |
//! |------|------|
//! | `x * 1`、`1 * x`、`x / 1`、`x ^ 1`、`x + 0`、`0 + x`、`x - 0` | `x` |
//! | `x * 0`、`0 * x`、`x - x` | `0` |
//! | `x ^ 0`、`x / x` | `1` |
//! | `0 - x` | `-x` |
//! | `--x`、`!!x` | `x` |
//! | `!(a < b)` | `a >= b`（其他比较同理） |
//!
//! 全是字面量的二元运算直接计算；加法链与乘法链中的多个数值常量合并为一个。
//!
//! `&`/`|` 链中的布尔常量合并：`a & true` 为 `a`，`a & false` 为 `false`，`|` 对偶。
//! 链中同时出现互斥的两项（`A` 与 `!A`，`A > 6` 与 `A <= 6`）时，
//! `&` 链为 `false`，`|` 链为 `true`。

use crate::error::Result;
use crate::expr::{Expr, ExprKind};
use crate::functions::Builtins;
use crate::operators::BinaryOperator;
use crate::visitor::Rewriter;

use super::infer_unit;

pub struct Simplifier;

fn is_number(expr: &Expr, n: f64) -> bool {
    expr.unit.is_none() && expr.as_number() == Some(n)
}

/// 不带单位的数值常量
fn plain_number(expr: &Expr) -> Option<f64> {
    if expr.unit.is_none() { expr.as_number() } else { None }
}

impl Simplifier {
    /// 字面量运算
    fn fold_literals(op: BinaryOperator, left: &Expr, right: &Expr) -> Option<Expr> {
        let (l, r) = (left.constant_value()?, right.constant_value()?);
        let value = Builtins::binary(op, &l, &r).ok()?;
        Expr::from_value(&value)
    }

    fn identity(op: BinaryOperator, left: &Expr, right: &Expr) -> Option<Expr> {
        use BinaryOperator::*;
        let result = match op {
            Add if is_number(right, 0.0) => left.clone(),
            Add if is_number(left, 0.0) => right.clone(),
            Subtract if is_number(right, 0.0) => left.clone(),
            Subtract if is_number(left, 0.0) => Expr::negate(right.clone()),
            Subtract if left == right => Expr::number(0.0),
            Multiply if is_number(left, 0.0) || is_number(right, 0.0) => Expr::number(0.0),
            Multiply if is_number(right, 1.0) => left.clone(),
            Multiply if is_number(left, 1.0) => right.clone(),
            Divide if is_number(right, 1.0) => left.clone(),
            Divide if left == right => Expr::number(1.0),
            Power if is_number(right, 1.0) => left.clone(),
            Power if is_number(right, 0.0) => Expr::number(1.0),
            _ => return None,
        };
        Some(result)
    }

    /// 合并加法链或乘法链中的数值常量
    ///
    /// 至少有两个常量时才改写：加法把合计放在末尾，乘法把乘积放在开头。
    fn gather_constants(op: BinaryOperator, expr: Expr) -> Expr {
        let mut operands = Vec::new();
        flatten(op, &expr, &mut operands);

        let (constants, terms): (Vec<Expr>, Vec<Expr>) = operands
            .into_iter()
            .partition(|operand| plain_number(operand).is_some());
        if constants.len() < 2 {
            return expr;
        }

        let numbers = constants.iter().filter_map(plain_number);
        let (combined, neutral) = match op {
            BinaryOperator::Add => (numbers.sum::<f64>(), 0.0),
            _ => (numbers.product::<f64>(), 1.0),
        };

        let mut terms = terms.into_iter();
        let Some(first) = terms.next() else {
            return Expr::number(combined);
        };
        let chain = terms.fold(first, |acc, term| Expr::binary(op, acc, term));

        if combined == neutral {
            chain
        } else if op == BinaryOperator::Add {
            Expr::binary(op, chain, Expr::number(combined))
        } else if combined == 0.0 {
            Expr::number(0.0)
        } else {
            Expr::binary(op, Expr::number(combined), chain)
        }
    }

    /// 化简 `&`/`|` 链
    fn bool_logic(op: BinaryOperator, expr: Expr) -> Expr {
        let seed = op == BinaryOperator::And;
        let mut operands = Vec::new();
        flatten(op, &expr, &mut operands);

        let mut result = seed;
        let mut had_constant = false;
        let mut terms = Vec::with_capacity(operands.len());
        for operand in operands {
            match operand.kind {
                ExprKind::Bool(b) if operand.unit.is_none() => {
                    had_constant = true;
                    result = if seed { result && b } else { result || b };
                }
                _ => terms.push(operand),
            }
        }

        if result != seed || terms.is_empty() {
            return Expr::boolean(result);
        }
        if mutually_exclusive(&terms) {
            return Expr::boolean(!seed);
        }
        if !had_constant {
            return expr;
        }

        let mut terms = terms.into_iter();
        match terms.next() {
            Some(first) => terms.fold(first, |acc, term| Expr::binary(op, acc, term)),
            None => Expr::boolean(result),
        }
    }
}

/// 链中是否有两项互为否定
fn mutually_exclusive(terms: &[Expr]) -> bool {
    terms.iter().enumerate().any(|(i, a)| {
        terms
            .iter()
            .enumerate()
            .any(|(j, b)| i != j && contradicts(a, b))
    })
}

/// `a` 是 `!b`，或两者左右操作数相同而比较方向相反
fn contradicts(a: &Expr, b: &Expr) -> bool {
    match (&a.kind, &b.kind) {
        (ExprKind::Not(inner), _) => inner.as_ref() == b,
        (
            ExprKind::Binary {
                op: op_a,
                left: left_a,
                right: right_a,
            },
            ExprKind::Binary {
                op: op_b,
                left: left_b,
                right: right_b,
            },
        ) => op_a.negated() == Some(*op_b) && left_a == left_b && right_a == right_b,
        _ => false,
    }
}

/// 展开同一操作符的链，带单位的中间节点视为整体
fn flatten(op: BinaryOperator, expr: &Expr, out: &mut Vec<Expr>) {
    match &expr.kind {
        ExprKind::Binary {
            op: inner,
            left,
            right,
        } if *inner == op && expr.unit.is_none() => {
            flatten(op, left, out);
            flatten(op, right, out);
        }
        _ => out.push(expr.clone()),
    }
}

impl Rewriter for Simplifier {
    fn rewrite_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Expr> {
        let left = left.rewrite(self)?;
        let right = right.rewrite(self)?;

        if let Some(folded) = Self::fold_literals(op, &left, &right) {
            let rebuilt = Expr::binary(op, left, right);
            let unit = expr.unit.clone().or_else(|| infer_unit(&rebuilt));
            return Ok(folded.with_unit_or_keep(unit));
        }

        if op.is_logical() {
            let simplified = Self::bool_logic(op, Expr::binary(op, left, right));
            return Ok(simplified.with_unit_or_keep(expr.unit.clone()));
        }

        if let Some(simplified) = Self::identity(op, &left, &right) {
            return Ok(simplified.with_unit_or_keep(expr.unit.clone()));
        }

        let rebuilt = Expr::binary(op, left, right);
        let result = match op {
            BinaryOperator::Add | BinaryOperator::Multiply => Self::gather_constants(op, rebuilt),
            _ => rebuilt,
        };
        Ok(result.with_unit_or_keep(expr.unit.clone()))
    }

    fn rewrite_negate(&mut self, expr: &Expr, operand: &Expr) -> Result<Expr> {
        let operand = operand.rewrite(self)?;
        let result = match operand.kind {
            ExprKind::Negate(inner) if operand.unit.is_none() => *inner,
            ExprKind::Number(n) => Expr {
                kind: ExprKind::Number(-n),
                unit: operand.unit,
            },
            kind => Expr::negate(Expr {
                kind,
                unit: operand.unit,
            }),
        };
        Ok(result.with_unit_or_keep(expr.unit.clone()))
    }

    fn rewrite_not(&mut self, expr: &Expr, operand: &Expr) -> Result<Expr> {
        let operand = operand.rewrite(self)?;
        let result = match operand.kind {
            ExprKind::Not(inner) => *inner,
            ExprKind::Bool(b) => Expr::boolean(!b),
            ExprKind::Binary { op, left, right } => match op.negated() {
                Some(flipped) => Expr::binary(flipped, *left, *right),
                None => Expr::not(Expr {
                    kind: ExprKind::Binary { op, left, right },
                    unit: operand.unit,
                }),
            },
            kind => Expr::not(Expr {
                kind,
                unit: operand.unit,
            }),
        };
        Ok(result.with_unit_or_keep(expr.unit.clone()))
    }
}
