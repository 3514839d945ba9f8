//! 符号求导
//!
//! 结果保持展开形式，不做任何代数化简：`x^2` 对 `x` 求导得到 `2 * x^1 * 1`。
//! 需要简洁形式的调用方可以再交给 [`Simplifier`](super::Simplifier)。

use crate::error::{ExpressionError, Result};
use crate::expr::{Expr, Variable};
use crate::operators::BinaryOperator;
use crate::visitor::Rewriter;

pub struct Differentiator {
    variable: String,
}

impl Differentiator {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }

    fn derive(&mut self, expr: &Expr) -> Result<Expr> {
        expr.rewrite(self)
    }

    fn unsupported(&self, what: impl std::fmt::Display) -> ExpressionError {
        ExpressionError::UnsupportedTransformation(format!(
            "无法对 {} 求关于 {} 的导数",
            what, self.variable
        ))
    }

    /// 幂函数求导
    ///
    /// 指数与求导变量无关时使用幂法则 `n * u^(n-1) * u'`，
    /// 否则使用 `u^v * (v' * LOG(u) + v * u' / u)`。
    fn power(&mut self, base: &Expr, exponent: &Expr) -> Result<Expr> {
        let base_derivative = self.derive(base)?;
        if !exponent.references(&self.variable) {
            let reduced = match exponent.as_number() {
                Some(n) if exponent.unit.is_none() => Expr::number(n - 1.0),
                _ => Expr::sub(exponent.clone(), Expr::number(1.0)),
            };
            return Ok(Expr::mul(
                Expr::mul(exponent.clone(), Expr::pow(base.clone(), reduced)),
                base_derivative,
            ));
        }

        let exponent_derivative = self.derive(exponent)?;
        Ok(Expr::mul(
            Expr::pow(base.clone(), exponent.clone()),
            Expr::add(
                Expr::mul(
                    exponent_derivative,
                    Expr::call("LOG", vec![base.clone()]),
                ),
                Expr::div(Expr::mul(exponent.clone(), base_derivative), base.clone()),
            ),
        ))
    }
}

impl Rewriter for Differentiator {
    fn rewrite_constant(&mut self, _expr: &Expr) -> Result<Expr> {
        Ok(Expr::number(0.0))
    }

    fn rewrite_variable(&mut self, _expr: &Expr, variable: &Variable) -> Result<Expr> {
        let matches = variable.name == self.variable || variable.full_name() == self.variable;
        Ok(Expr::number(if matches { 1.0 } else { 0.0 }))
    }

    fn rewrite_negate(&mut self, _expr: &Expr, operand: &Expr) -> Result<Expr> {
        Ok(Expr::negate(self.derive(operand)?))
    }

    fn rewrite_not(&mut self, expr: &Expr, _operand: &Expr) -> Result<Expr> {
        Err(self.unsupported(expr))
    }

    fn rewrite_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Expr> {
        match op {
            BinaryOperator::Add => Ok(Expr::add(self.derive(left)?, self.derive(right)?)),
            BinaryOperator::Subtract => Ok(Expr::sub(self.derive(left)?, self.derive(right)?)),
            BinaryOperator::Multiply => {
                let (du, dv) = (self.derive(left)?, self.derive(right)?);
                Ok(Expr::add(
                    Expr::mul(du, right.clone()),
                    Expr::mul(left.clone(), dv),
                ))
            }
            BinaryOperator::Divide => {
                let (du, dv) = (self.derive(left)?, self.derive(right)?);
                Ok(Expr::div(
                    Expr::sub(Expr::mul(du, right.clone()), Expr::mul(left.clone(), dv)),
                    Expr::pow(right.clone(), Expr::number(2.0)),
                ))
            }
            BinaryOperator::Power => self.power(left, right),
            _ => Err(self.unsupported(expr)),
        }
    }

    fn rewrite_if(
        &mut self,
        _expr: &Expr,
        condition: &Expr,
        then: &Expr,
        otherwise: &Expr,
    ) -> Result<Expr> {
        Ok(Expr::if_then_else(
            condition.clone(),
            self.derive(then)?,
            self.derive(otherwise)?,
        ))
    }

    fn rewrite_set(&mut self, expr: &Expr, _items: &[Expr]) -> Result<Expr> {
        if expr.references(&self.variable) {
            return Err(self.unsupported(expr));
        }
        Ok(Expr::number(0.0))
    }

    /// 链式法则：f(u)' = f'(u) * u'
    fn rewrite_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Result<Expr> {
        if !expr.references(&self.variable) {
            return Ok(Expr::number(0.0));
        }
        let upper = name.to_ascii_uppercase();
        if let ("POW", [base, exponent]) = (upper.as_str(), args) {
            return self.power(base, exponent);
        }
        let [u] = args else {
            return Err(self.unsupported(expr));
        };

        let du = self.derive(u)?;
        let call = |f: &str| Expr::call(f, vec![u.clone()]);
        let outer = match upper.as_str() {
            "SIN" => call("COS"),
            "COS" => Expr::negate(call("SIN")),
            "EXP" => call("EXP"),
            "LOG" => return Ok(Expr::div(du, u.clone())),
            "SQRT" => {
                return Ok(Expr::div(du, Expr::mul(Expr::number(2.0), call("SQRT"))));
            }
            "ABS" => call("SIGN"),
            _ => return Err(self.unsupported(expr)),
        };
        Ok(Expr::mul(outer, du))
    }

    fn rewrite_property(&mut self, expr: &Expr, _target: &Expr, _name: &str) -> Result<Expr> {
        if expr.references(&self.variable) {
            return Err(self.unsupported(expr));
        }
        Ok(Expr::number(0.0))
    }

    fn rewrite_failed(&mut self, expr: &Expr) -> Result<Expr> {
        Err(self.unsupported(expr))
    }
}

#[cfg(test)]
mod tests {
    use crate::env::ValueEnv;
    use crate::evaluator::evaluate;
    use crate::parser::parse;
    use crate::rewrite::{differentiate, simplify};
    use crate::value::Value;

    fn derived(text: &str) -> String {
        differentiate(&parse(text).unwrap(), "x").unwrap().to_string()
    }

    fn slope_at(text: &str, x: f64) -> f64 {
        let derivative = differentiate(&parse(text).unwrap(), "x").unwrap();
        match evaluate(&derivative, &ValueEnv::from_pairs([("x", x)])).unwrap() {
            Some(Value::Number(n)) => n,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_power_rule_unsimplified() {
        assert_eq!(derived("x^2"), "2 * x^1 * 1");
        assert_eq!(derived("x^3"), "3 * x^2 * 1");
    }

    #[test]
    fn test_constants_and_variables() {
        assert_eq!(derived("5"), "0");
        assert_eq!(derived("x"), "1");
        assert_eq!(derived("y"), "0");
        assert_eq!(derived("x + y"), "1 + 0");
    }

    #[test]
    fn test_product_rule() {
        assert_eq!(derived("3 * x"), "0 * x + 3 * 1");
        assert_eq!(slope_at("x * x", 3.0), 6.0);
    }

    #[test]
    fn test_quotient_rule() {
        assert_eq!(slope_at("1 / x", 2.0), -0.25);
    }

    #[test]
    fn test_chain_rule() {
        assert_eq!(slope_at("SIN(x)", 0.0), 1.0);
        assert_eq!(slope_at("EXP(2 * x)", 0.0), 2.0);
        assert_eq!(slope_at("LOG(x)", 4.0), 0.25);
        assert_eq!(slope_at("SQRT(x)", 4.0), 0.25);
    }

    #[test]
    fn test_variable_exponent() {
        // d/dx 2^x = 2^x * ln 2
        let expected = 8.0 * std::f64::consts::LN_2;
        assert!((slope_at("2^x", 3.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_simplify_after_derive() {
        let derivative = differentiate(&parse("x^2").unwrap(), "x").unwrap();
        assert_eq!(simplify(&derivative).unwrap().to_string(), "2 * x");
    }

    #[test]
    fn test_unsupported() {
        for text in ["x > 1", "MAX({x, 1})", "FOO(x)", "!x"] {
            let err = differentiate(&parse(text).unwrap(), "x").unwrap_err();
            assert_eq!(err.code(), "UNSUPPORTED_TRANSFORMATION", "{}", text);
        }
        // 不含求导变量的调用视为常量
        assert_eq!(derived("FOO(y)"), "0");
    }
}
