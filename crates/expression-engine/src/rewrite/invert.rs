//! 方程求解
//!
//! 从等式根部沿包含目标的一侧向下走，每经过一个操作符就把它的逆运算施加到另一侧：
//! `a * x + b == c` 解 `x` 依次得到 `x == (c - b) / a`。
//! 目标只能在等式中出现一次，途经的每个操作符都必须可逆。

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{ExpressionError, Result};
use crate::expr::{Expr, ExprKind, Variable};
use crate::operators::BinaryOperator;
use crate::visitor::Visitor;

/// 求解访问者：访问含目标的一侧，累积另一侧
pub struct Inverter<'t> {
    target: &'t Expr,
    other_side: Expr,
}

fn contains(expr: &Expr, target: &Expr) -> bool {
    expr == target || expr.children().into_iter().any(|child| contains(child, target))
}

impl<'t> Inverter<'t> {
    /// 解等式 `equation`，返回 `target == ...`
    pub fn solve(equation: &Expr, target: &'t Expr) -> Result<Expr> {
        let ExprKind::Binary {
            op: BinaryOperator::Equal,
            left,
            right,
        } = &equation.kind
        else {
            return Err(ExpressionError::UnsupportedTransformation(format!(
                "只能对等式求解: {}",
                equation
            )));
        };

        let (side, other) = match (contains(left, target), contains(right, target)) {
            (true, false) => (left.as_ref(), right.as_ref()),
            (false, true) => (right.as_ref(), left.as_ref()),
            (true, true) => {
                return Err(ExpressionError::UnsupportedTransformation(format!(
                    "{} 同时出现在等式两侧",
                    target
                )));
            }
            (false, false) => {
                return Err(ExpressionError::UnsupportedTransformation(format!(
                    "等式中不含 {}",
                    target
                )));
            }
        };

        let mut inverter = Inverter {
            target,
            other_side: other.clone(),
        };
        let solved = side.accept(&mut inverter)?;
        debug!(equation = %equation, solved = %solved, "方程求解完成");
        Ok(solved)
    }

    /// 到达目标时组装结果，否则继续向下
    fn descend(&mut self, expr: &Expr) -> Result<Expr> {
        if expr == self.target {
            return Ok(Expr::binary(
                BinaryOperator::Equal,
                self.target.clone(),
                self.other_side.clone(),
            ));
        }
        expr.accept(self)
    }

    fn apply(&mut self, f: impl FnOnce(Expr) -> Expr) {
        let current = std::mem::replace(&mut self.other_side, Expr::number(0.0));
        self.other_side = f(current);
    }

    fn stuck(&self, expr: &Expr) -> Result<Expr> {
        if expr == self.target {
            return Ok(Expr::binary(
                BinaryOperator::Equal,
                self.target.clone(),
                self.other_side.clone(),
            ));
        }
        Err(ExpressionError::UnsupportedTransformation(format!(
            "无法从 {} 中解出 {}",
            expr, self.target
        )))
    }
}

impl Visitor for Inverter<'_> {
    type Output = Result<Expr>;

    fn visit_number(&mut self, expr: &Expr, _value: f64) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_string(&mut self, expr: &Expr, _value: &str) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_bool(&mut self, expr: &Expr, _value: bool) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_date(&mut self, expr: &Expr, _value: &DateTime<Utc>) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_variable(&mut self, expr: &Expr, _variable: &Variable) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_negate(&mut self, expr: &Expr, operand: &Expr) -> Result<Expr> {
        if expr == self.target {
            return self.stuck(expr);
        }
        self.apply(Expr::negate);
        self.descend(operand)
    }

    fn visit_not(&mut self, expr: &Expr, _operand: &Expr) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Expr> {
        if expr == self.target {
            return self.stuck(expr);
        }
        let in_left = contains(left, self.target);
        if in_left && contains(right, self.target) {
            return self.stuck(expr);
        }
        let (l, r) = (left.clone(), right.clone());
        match (op, in_left) {
            (BinaryOperator::Add, true) => self.apply(|c| Expr::sub(c, r)),
            (BinaryOperator::Add, false) => self.apply(|c| Expr::sub(c, l)),
            (BinaryOperator::Subtract, true) => self.apply(|c| Expr::add(c, r)),
            // a - x = c  =>  x = a - c
            (BinaryOperator::Subtract, false) => self.apply(|c| Expr::sub(l, c)),
            (BinaryOperator::Multiply, true) => self.apply(|c| Expr::div(c, r)),
            (BinaryOperator::Multiply, false) => self.apply(|c| Expr::div(c, l)),
            (BinaryOperator::Divide, true) => self.apply(|c| Expr::mul(c, r)),
            // a / x = c  =>  x = a / c
            (BinaryOperator::Divide, false) => self.apply(|c| Expr::div(l, c)),
            // x ^ b = c  =>  x = c ^ (1 / b)
            (BinaryOperator::Power, true) => {
                self.apply(|c| Expr::pow(c, Expr::div(Expr::number(1.0), r)))
            }
            // a ^ x = c  =>  x = LOG(c) / LOG(a)
            (BinaryOperator::Power, false) => self.apply(|c| {
                Expr::div(Expr::call("LOG", vec![c]), Expr::call("LOG", vec![l]))
            }),
            _ => return self.stuck(expr),
        }
        self.descend(if in_left { left } else { right })
    }

    fn visit_if(&mut self, expr: &Expr, _c: &Expr, _t: &Expr, _o: &Expr) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_set(&mut self, expr: &Expr, _items: &[Expr]) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Result<Expr> {
        if expr == self.target {
            return self.stuck(expr);
        }
        let [inner] = args else {
            return self.stuck(expr);
        };
        match name.to_ascii_uppercase().as_str() {
            "SQRT" => self.apply(|c| Expr::pow(c, Expr::number(2.0))),
            "EXP" => self.apply(|c| Expr::call("LOG", vec![c])),
            "LOG" => self.apply(|c| Expr::call("EXP", vec![c])),
            _ => return self.stuck(expr),
        }
        self.descend(inner)
    }

    fn visit_property(&mut self, expr: &Expr, _target: &Expr, _name: &str) -> Result<Expr> {
        self.stuck(expr)
    }

    fn visit_failed(&mut self, expr: &Expr, _text: &str, _reason: &str) -> Result<Expr> {
        self.stuck(expr)
    }
}

#[cfg(test)]
mod tests {
    use crate::env::ValueEnv;
    use crate::evaluator::evaluate;
    use crate::expr::Expr;
    use crate::parser::parse;
    use crate::rewrite::invert;
    use crate::value::Value;

    fn solved(text: &str, target: &str) -> String {
        invert(&parse(text).unwrap(), &Expr::variable(target))
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_linear() {
        assert_eq!(solved("a * x + b == c", "x"), "x == (c - b) / a");
        assert_eq!(solved("y == x / 2", "x"), "x == y * 2");
        assert_eq!(solved("10 - x == 4", "x"), "x == 10 - 4");
        assert_eq!(solved("-x == 3", "x"), "x == -3");
    }

    #[test]
    fn test_nonlinear() {
        assert_eq!(solved("x ^ 2 == 9", "x"), "x == 9^(1 / 2)");
        assert_eq!(solved("2 ^ x == 8", "x"), "x == LOG(8) / LOG(2)");
        assert_eq!(solved("SQRT(x) == 3", "x"), "x == 3^2");
        assert_eq!(solved("EXP(x) == 1", "x"), "x == LOG(1)");
    }

    #[test]
    fn test_solution_evaluates() {
        let equation = parse("3 * (x - 1) / 2 == 6").unwrap();
        let solution = invert(&equation, &Expr::variable("x")).unwrap();
        let crate::expr::ExprKind::Binary { right, .. } = &solution.kind else {
            panic!("solution must be an equation");
        };
        assert_eq!(
            evaluate(right, &ValueEnv::new()).unwrap(),
            Some(Value::Number(5.0))
        );
    }

    #[test]
    fn test_compound_target() {
        let equation = parse("2 * (a + b) == 10").unwrap();
        let target = parse("a + b").unwrap();
        assert_eq!(invert(&equation, &target).unwrap().to_string(), "a + b == 10 / 2");
    }

    #[test]
    fn test_errors() {
        for (text, target) in [("x + x == 2", "x"), ("a == b", "x"), ("x > 2", "x"), ("ABS(x) == 2", "x")] {
            let err = invert(&parse(text).unwrap(), &Expr::variable(target)).unwrap_err();
            assert_eq!(err.code(), "UNSUPPORTED_TRANSFORMATION", "{}", text);
        }
    }
}
