//! 常量折叠

use tracing::debug;

use crate::env::ValueEnv;
use crate::error::Result;
use crate::evaluator::evaluate;
use crate::expr::{Expr, ExprKind};
use crate::operators::BinaryOperator;
use crate::visitor::{
    Rewriter, walk_binary, walk_call, walk_if, walk_negate, walk_not, walk_property,
};

use super::infer_unit;

/// 把所有操作数都是常量的子树替换为一个常量
///
/// 折叠结果保留节点的单位标签，节点没有标签时使用推断出的单位。
/// 求值失败的子树保持原样，错误留到真正求值时报告。
pub struct ConstantOptimizer;

impl ConstantOptimizer {
    fn fold(&self, rebuilt: Expr) -> Expr {
        let children = rebuilt.children();
        if children.is_empty() || !children.iter().all(|child| child.is_constant()) {
            return rebuilt;
        }

        match evaluate(&rebuilt, &ValueEnv::new()) {
            Ok(Some(value)) => match Expr::from_value(&value) {
                Some(constant) => {
                    let unit = rebuilt.unit.clone().or_else(|| infer_unit(&rebuilt));
                    debug!(from = %rebuilt, to = %value, "常量折叠");
                    constant.with_unit_or_keep(unit)
                }
                None => rebuilt,
            },
            _ => rebuilt,
        }
    }
}

/// 带时间单位的参数是时间函数的周期，不能折叠进调用
fn has_period_argument(args: &[Expr]) -> bool {
    args.iter().any(|arg| {
        let inner = match &arg.kind {
            ExprKind::Negate(inner) => inner.as_ref(),
            _ => arg,
        };
        inner.unit.as_ref().is_some_and(|unit| unit.is_time())
    })
}

impl Rewriter for ConstantOptimizer {
    fn rewrite_negate(&mut self, expr: &Expr, operand: &Expr) -> Result<Expr> {
        let rebuilt = walk_negate(self, expr, operand)?;
        Ok(self.fold(rebuilt))
    }

    fn rewrite_not(&mut self, expr: &Expr, operand: &Expr) -> Result<Expr> {
        let rebuilt = walk_not(self, expr, operand)?;
        Ok(self.fold(rebuilt))
    }

    fn rewrite_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Expr> {
        let rebuilt = walk_binary(self, expr, op, left, right)?;
        Ok(self.fold(rebuilt))
    }

    /// 只有条件能折叠为常量时才按分支短路
    fn rewrite_if(
        &mut self,
        expr: &Expr,
        condition: &Expr,
        then: &Expr,
        otherwise: &Expr,
    ) -> Result<Expr> {
        let folded = condition.rewrite(self)?;
        if let Some(value) = folded.constant_value() {
            if let Ok(chosen) = value.truthy() {
                let branch = if chosen { then } else { otherwise };
                return Ok(branch.rewrite(self)?.with_unit_or_keep(expr.unit.clone()));
            }
        }
        walk_if(self, expr, condition, then, otherwise)
    }

    fn rewrite_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Result<Expr> {
        let rebuilt = walk_call(self, expr, name, args)?;
        if has_period_argument(args) {
            return Ok(rebuilt);
        }
        Ok(self.fold(rebuilt))
    }

    fn rewrite_property(&mut self, expr: &Expr, target: &Expr, name: &str) -> Result<Expr> {
        let rebuilt = walk_property(self, expr, target, name)?;
        Ok(self.fold(rebuilt))
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::parse;
    use crate::rewrite::optimize;

    fn optimized(text: &str) -> String {
        optimize(&parse(text).unwrap()).unwrap().to_string()
    }

    #[test]
    fn test_folds_literals() {
        assert_eq!(optimized("1 + 2 * 3"), "7");
        assert_eq!(optimized("x + 2 * 3"), "x + 6");
        assert_eq!(optimized("\"a\" + \"b\""), "\"ab\"");
        assert_eq!(optimized("1 < 2 & 3 > 4"), "false");
    }

    #[test]
    fn test_keeps_units() {
        assert_eq!(optimized("1[occ] + 1[occ]"), "2[occ]");
        assert_eq!(optimized("(1 + 1)d"), "2[d]");
        assert_eq!(optimized("(1+1)d + x"), "2[d] + x");
    }

    #[test]
    fn test_does_not_fold_variables() {
        assert_eq!(optimized("a + b"), "a + b");
        assert_eq!(optimized("(a + 1) + 2"), "a + 1 + 2");
    }

    #[test]
    fn test_if_short_circuits_on_constant_condition() {
        assert_eq!(optimized("IF(1 > 0, x, y)"), "x");
        assert_eq!(optimized("IF(false, x, y + (2 * 2))"), "y + 4");
        assert_eq!(optimized("IF(c, 1 + 1, 2)"), "IF(c, 2, 2)");
    }

    #[test]
    fn test_keeps_temporal_calls_and_errors() {
        assert_eq!(optimized("AVERAGE(x, (1 + 1)h)"), "AVERAGE(x,2[h])");
        assert_eq!(optimized("MAX(5, 1h)"), "MAX(5,1[h])");
        assert_eq!(optimized("MAX({1, 2})"), "MAX({1,2})");
        assert_eq!(optimized("MAX(1, 2)"), "2");
        assert_eq!(optimized("\"a\" * 2"), "\"a\" * 2");
        assert_eq!(optimized("ABS(-3) + DEADBAND(60, 65, 75)"), "8");
    }

    #[test]
    fn test_input_tree_unchanged() {
        let expr = parse("1 + 2").unwrap();
        let before = expr.clone();
        let _ = optimize(&expr).unwrap();
        assert_eq!(expr, before);
    }
}
