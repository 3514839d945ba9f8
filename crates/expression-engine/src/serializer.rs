//! 规范序列化
//!
//! 输出与区域设置无关：小数点固定为 `.`，从不使用科学计数法。
//! 括号只在省略后会改变含义时保留，另外两处为了可读性总是加上：
//! 同优先级的不同操作符（`(a - b) + c`、`(A & B) | C`）以及非变量的属性访问目标。

use chrono::{DateTime, Utc};

use crate::expr::{Expr, ExprKind, Variable};
use crate::lexer::is_plain_identifier;
use crate::operators::BinaryOperator;
use crate::value::format_datetime;
use crate::visitor::Visitor;

/// 将表达式树渲染为规范文本
pub fn serialize(expr: &Expr) -> String {
    expr.accept(&mut Serializer)
}

/// 数值的规范文本
///
/// `f64` 的 `Display` 输出最短可回读的十进制形式，不含指数。
/// 非有限值没有字面量，改写为等价的除法。
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "(0 / 0)".to_string()
    } else if value == f64::INFINITY {
        "(1 / 0)".to_string()
    } else if value == f64::NEG_INFINITY {
        "(-1 / 0)".to_string()
    } else {
        format!("{}", value)
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn name_text(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("[{}]", name)
    }
}

/// 括号分组层级：`&` 与 `|` 视为同一层
fn group(op: BinaryOperator) -> u8 {
    if op.is_logical() { 1 } else { op.precedence() }
}

fn is_negative_number(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Number(n) if n.is_sign_negative() && !n.is_nan())
}

/// 带单位的非数值节点已经渲染成 `(..)[u]`，本身就是一个整体
fn is_unit_wrapped(expr: &Expr) -> bool {
    expr.unit.is_some() && !matches!(expr.kind, ExprKind::Number(_))
}

fn needs_parens(parent: BinaryOperator, child: &Expr, right_side: bool) -> bool {
    if parent == BinaryOperator::Power
        && right_side
        && (matches!(child.kind, ExprKind::Negate(_)) || is_negative_number(child))
    {
        return true;
    }
    if is_unit_wrapped(child) {
        return false;
    }
    match &child.kind {
        ExprKind::Binary { op, .. } => {
            let (p, c) = (group(parent), group(*op));
            if c != p {
                c < p
            } else {
                !(*op == parent && parent.is_associative())
            }
        }
        _ => false,
    }
}

pub struct Serializer;

impl Serializer {
    fn with_unit(expr: &Expr, body: String) -> String {
        match (&expr.unit, &expr.kind) {
            (None, _) => body,
            (Some(unit), ExprKind::Number(_)) => format!("{}[{}]", body, unit.name()),
            (Some(unit), _) => format!("({})[{}]", body, unit.name()),
        }
    }

    fn operand(&mut self, parent: BinaryOperator, child: &Expr, right_side: bool) -> String {
        let text = child.accept(self);
        if needs_parens(parent, child, right_side) {
            format!("({})", text)
        } else {
            text
        }
    }

    fn unary_operand(&mut self, operand: &Expr) -> String {
        let text = operand.accept(self);
        if matches!(operand.kind, ExprKind::Binary { .. }) && !is_unit_wrapped(operand) {
            format!("({})", text)
        } else {
            text
        }
    }

    fn join(&mut self, items: &[Expr], separator: &str) -> String {
        items
            .iter()
            .map(|item| item.accept(self))
            .collect::<Vec<_>>()
            .join(separator)
    }
}

impl Visitor for Serializer {
    type Output = String;

    fn visit_number(&mut self, expr: &Expr, value: f64) -> String {
        Self::with_unit(expr, format_number(value))
    }

    fn visit_string(&mut self, expr: &Expr, value: &str) -> String {
        Self::with_unit(expr, quote(value))
    }

    fn visit_bool(&mut self, expr: &Expr, value: bool) -> String {
        Self::with_unit(expr, value.to_string())
    }

    fn visit_date(&mut self, expr: &Expr, value: &DateTime<Utc>) -> String {
        Self::with_unit(expr, format!("DATETIME({})", quote(&format_datetime(value))))
    }

    fn visit_variable(&mut self, expr: &Expr, variable: &Variable) -> String {
        let body = match &variable.version {
            Some(_) => format!("[{}]", variable.full_name()),
            None => name_text(&variable.name),
        };
        Self::with_unit(expr, body)
    }

    fn visit_negate(&mut self, expr: &Expr, operand: &Expr) -> String {
        let body = format!("-{}", self.unary_operand(operand));
        Self::with_unit(expr, body)
    }

    fn visit_not(&mut self, expr: &Expr, operand: &Expr) -> String {
        let body = format!("!{}", self.unary_operand(operand));
        Self::with_unit(expr, body)
    }

    fn visit_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> String {
        let left = self.operand(op, left, false);
        let right = self.operand(op, right, true);
        let body = if op == BinaryOperator::Power {
            format!("{}^{}", left, right)
        } else {
            format!("{} {} {}", left, op.symbol(), right)
        };
        Self::with_unit(expr, body)
    }

    fn visit_if(&mut self, expr: &Expr, condition: &Expr, then: &Expr, otherwise: &Expr) -> String {
        let body = format!(
            "IF({}, {}, {})",
            condition.accept(self),
            then.accept(self),
            otherwise.accept(self)
        );
        Self::with_unit(expr, body)
    }

    fn visit_set(&mut self, expr: &Expr, items: &[Expr]) -> String {
        let body = format!("{{{}}}", self.join(items, ","));
        Self::with_unit(expr, body)
    }

    fn visit_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> String {
        let body = format!("{}({})", name, self.join(args, ","));
        Self::with_unit(expr, body)
    }

    fn visit_property(&mut self, expr: &Expr, target: &Expr, name: &str) -> String {
        let target_text = target.accept(self);
        let plain_variable = matches!(
            &target.kind,
            ExprKind::Variable(var) if var.version.is_none()
        ) && target.unit.is_none();
        let body = if plain_variable || is_unit_wrapped(target) {
            format!("{}.{}", target_text, name_text(name))
        } else {
            format!("({}).{}", target_text, name_text(name))
        };
        Self::with_unit(expr, body)
    }

    fn visit_failed(&mut self, expr: &Expr, text: &str, _reason: &str) -> String {
        Self::with_unit(expr, format!("FAILED({})", quote(text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn canonical(text: &str) -> String {
        serialize(&parse(text).unwrap())
    }

    #[test]
    fn test_format_number_is_invariant() {
        assert_eq!(format_number(0.00000005), "0.00000005");
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-202.2), "-202.2");
        assert_eq!(format_number(1e21), "1000000000000000000000");
        assert_eq!(format_number(f64::INFINITY), "(1 / 0)");
    }

    #[test]
    fn test_units_render_bracketed() {
        assert_eq!(canonical("(1occ) + 1occ + 5"), "1[occ] + 1[occ] + 5");
        assert_eq!(canonical("5[in.wc]"), "5[in.wc]");
        assert_eq!(canonical("10%"), "10[%]");
        assert_eq!(canonical("5°C"), "5[degC]");
        assert_eq!(canonical("(5+5)h"), "(5 + 5)[h]");
    }

    #[test]
    fn test_calls_and_sets() {
        assert_eq!(canonical("foo(2, 3)"), "foo(2,3)");
        assert_eq!(canonical("bar(0, \"str\", 5.4)"), "bar(0,\"str\",5.4)");
        assert_eq!(canonical("{1, 2, 3}"), "{1,2,3}");
        assert_eq!(canonical("AVERAGE({1,2,3})"), "AVERAGE({1,2,3})");
        assert_eq!(canonical("IF(a>1,2,3)"), "IF(a > 1, 2, 3)");
    }

    #[test]
    fn test_arithmetic_parenthesization() {
        assert_eq!(canonical("(1+(5*6)/A)-2*3"), "(1 + (5 * 6) / A) - 2 * 3");
        assert_eq!(canonical("(1+2)-(3*4)/5^6"), "(1 + 2) - (3 * 4) / 5^6");
        assert_eq!(canonical("a/b/c/d"), "((a / b) / c) / d");
        assert_eq!(canonical("(1+(2+(3+(4+(5+6)))))"), "1 + 2 + 3 + 4 + 5 + 6");
        assert_eq!(canonical("a*b*c+2"), "a * b * c + 2");
        assert_eq!(canonical("A ^ 3"), "A^3");
    }

    #[test]
    fn test_negative_exponent() {
        assert_eq!(canonical("(a+b+c)^(-3)"), "(a + b + c)^(-3)");
        assert_eq!(canonical("x^-2"), "x^(-2)");
        assert_eq!(serialize(&Expr::pow(Expr::variable("x"), Expr::number(-2.0))), "x^(-2)");
    }

    #[test]
    fn test_unary_minus() {
        assert_eq!(canonical("-200"), "-200");
        assert_eq!(canonical("-202.2"), "-202.2");
        assert_eq!(canonical("a + -b"), "a + -b");
        assert_eq!(canonical("-(a + b)"), "-(a + b)");
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(canonical("A>23"), "A > 23");
        assert_eq!(canonical("\"abc\">=0.5"), "\"abc\" >= 0.5");
        assert_eq!(canonical("(A AND B) OR NOT C"), "(A & B) | !C");
        assert_eq!(canonical("!(A || !((B && C) || D))"), "!(A | !((B & C) | D))");
        assert_eq!(canonical("a<5 && b>=6"), "a < 5 & b >= 6");
        assert_eq!(
            canonical("[air_flow_sp_ratio] > 1.1 & [damper_cmd] < 0.05"),
            "air_flow_sp_ratio > 1.1 & damper_cmd < 0.05"
        );
    }

    #[test]
    fn test_property_access() {
        assert_eq!(canonical("this.supplyFan.motorPower"), "(this.supplyFan).motorPower");
        assert_eq!(
            canonical("this.supplyFan.motorPower * [fan_speed]^3"),
            "(this.supplyFan).motorPower * fan_speed^3"
        );
        assert_eq!(canonical("(E+F).LENGTH"), "(E + F).LENGTH");
    }

    #[test]
    fn test_bracketed_names() {
        assert_eq!(canonical("[foo bar]"), "[foo bar]");
        assert_eq!(canonical("[A]"), "A");
        assert_eq!(canonical("[A;1]"), "[A;1]");
        assert_eq!(canonical("[O'Brien]"), "[O'Brien]");
    }

    #[test]
    fn test_strings_escape() {
        assert_eq!(canonical(r#""say \"hi\" \\ ok""#), r#""say \"hi\" \\ ok""#);
        assert_eq!(canonical("'single'"), "\"single\"");
    }

    #[test]
    fn test_long_chain() {
        let text = (1..20).map(|i| format!("p{}", i)).collect::<Vec<_>>().join("+");
        let expected = (1..20).map(|i| format!("p{}", i)).collect::<Vec<_>>().join(" + ");
        assert_eq!(canonical(&text), expected);
    }

    #[test]
    fn test_idempotent() {
        for text in [
            "(1+(5*6)/A)-2*3",
            "a/b/c/d",
            "-x^2 + (a - b) - c",
            "IF(a > 1 & b, {1,2}, DELTA(x, 7d, -1h))",
            "(this.a).b.c + (5+5)h",
            "DATETIME(\"2024-01-01T00:00:00Z\").Hour",
            "x^(-2)^3",
        ] {
            let once = canonical(text);
            assert_eq!(canonical(&once), once, "not idempotent for {}", text);
        }
    }
}
