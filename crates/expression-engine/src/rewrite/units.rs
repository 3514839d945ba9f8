//! 单位推断
//!
//! 显式单位标签优先；其余节点按单位代数组合子节点单位：
//! 同单位加减保持不变，与无单位操作数相乘除保持另一侧单位，
//! 两个不同单位相乘除得到以 `.` 连接的组合单位，同单位相除约掉。

use chrono::{DateTime, Utc};

use crate::env::Env;
use crate::expr::{Expr, Variable};
use crate::functions::TemporalFunction;
use crate::operators::BinaryOperator;
use crate::serializer::format_number;
use crate::units::{Unit, UnitRegistry};
use crate::visitor::Visitor;

/// 变量名 → 单位
pub type UnitEnv = Env<Unit>;

pub struct UnitInferer<'a> {
    variables: Option<&'a UnitEnv>,
    /// 组合单位登记到此注册表
    registry: &'a UnitRegistry,
}

impl Default for UnitInferer<'_> {
    fn default() -> Self {
        Self {
            variables: None,
            registry: UnitRegistry::global(),
        }
    }
}

impl<'a> UnitInferer<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 变量的单位从 `variables` 中查找
    pub fn with_variables(variables: &'a UnitEnv) -> Self {
        Self {
            variables: Some(variables),
            ..Self::default()
        }
    }

    pub fn with_registry(mut self, registry: &'a UnitRegistry) -> Self {
        self.registry = registry;
        self
    }

    fn compound(&self, left: &Unit, right: &Unit) -> Unit {
        self.registry
            .get(&format!("{}.{}", left.name(), right.name()))
    }
}

impl Visitor for UnitInferer<'_> {
    type Output = Option<Unit>;

    fn visit_number(&mut self, expr: &Expr, _value: f64) -> Option<Unit> {
        expr.unit.clone()
    }

    fn visit_string(&mut self, expr: &Expr, _value: &str) -> Option<Unit> {
        expr.unit.clone()
    }

    fn visit_bool(&mut self, expr: &Expr, _value: bool) -> Option<Unit> {
        expr.unit.clone()
    }

    fn visit_date(&mut self, expr: &Expr, _value: &DateTime<Utc>) -> Option<Unit> {
        expr.unit.clone()
    }

    fn visit_variable(&mut self, expr: &Expr, variable: &Variable) -> Option<Unit> {
        expr.unit.clone().or_else(|| {
            let variables = self.variables?;
            variables
                .get(&variable.full_name())
                .or_else(|| variables.get(&variable.name))
                .cloned()
        })
    }

    fn visit_negate(&mut self, expr: &Expr, operand: &Expr) -> Option<Unit> {
        expr.unit.clone().or_else(|| operand.accept(self))
    }

    fn visit_not(&mut self, expr: &Expr, _operand: &Expr) -> Option<Unit> {
        expr.unit.clone()
    }

    fn visit_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Option<Unit> {
        if let Some(unit) = &expr.unit {
            return Some(unit.clone());
        }
        if !op.is_arithmetic() {
            return None;
        }

        let left_unit = left.accept(self);
        if op == BinaryOperator::Power {
            return match (left_unit, right.as_number()) {
                (Some(unit), Some(n)) if n == 1.0 => Some(unit),
                (Some(unit), Some(n)) => {
                    Some(self.registry.get(&format!("{}^{}", unit.name(), format_number(n))))
                }
                _ => None,
            };
        }

        let right_unit = right.accept(self);
        match (op, left_unit, right_unit) {
            (_, None, None) => None,
            (_, Some(unit), None) | (_, None, Some(unit)) => Some(unit),
            // 单位不一致的加减保留左侧单位
            (BinaryOperator::Add | BinaryOperator::Subtract, Some(l), Some(_)) => Some(l),
            (BinaryOperator::Divide, Some(l), Some(r)) if l == r => None,
            (_, Some(l), Some(r)) => Some(self.compound(&l, &r)),
        }
    }

    fn visit_if(&mut self, expr: &Expr, _condition: &Expr, then: &Expr, otherwise: &Expr) -> Option<Unit> {
        expr.unit
            .clone()
            .or_else(|| then.accept(self))
            .or_else(|| otherwise.accept(self))
    }

    fn visit_set(&mut self, expr: &Expr, items: &[Expr]) -> Option<Unit> {
        expr.unit
            .clone()
            .or_else(|| items.iter().find_map(|item| item.accept(self)))
    }

    fn visit_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Option<Unit> {
        if let Some(unit) = &expr.unit {
            return Some(unit.clone());
        }
        let first = args.first()?;
        match TemporalFunction::from_name(name) {
            Some(function) if function.is_dimensionless() => None,
            Some(_) => first.accept(self),
            None => match name.to_ascii_uppercase().as_str() {
                "ABS" | "CEILING" | "FLOOR" | "ROUND" | "DEADBAND" | "IFNAN" | "MOD" => {
                    first.accept(self)
                }
                _ => None,
            },
        }
    }

    fn visit_property(&mut self, expr: &Expr, _target: &Expr, _name: &str) -> Option<Unit> {
        expr.unit.clone()
    }

    fn visit_failed(&mut self, expr: &Expr, _text: &str, _reason: &str) -> Option<Unit> {
        expr.unit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::rewrite::infer_unit;

    fn unit_of(text: &str) -> Option<String> {
        infer_unit(&parse(text).unwrap()).map(|u| u.name().to_string())
    }

    #[test]
    fn test_compound_unit() {
        assert_eq!(unit_of("5W * 10s"), Some("W.s".to_string()));
        assert_eq!(unit_of("5W / 10s"), Some("W.s".to_string()));
    }

    #[test]
    fn test_same_unit_rules() {
        assert_eq!(unit_of("1h + 2h"), Some("h".to_string()));
        assert_eq!(unit_of("1h + 2"), Some("h".to_string()));
        assert_eq!(unit_of("10kW / 2kW"), None);
        assert_eq!(unit_of("3 * 4kW"), Some("kW".to_string()));
        assert_eq!(unit_of("1 + 2"), None);
    }

    #[test]
    fn test_explicit_tag_wins() {
        assert_eq!(unit_of("(5W * 10s)kWh"), Some("kWh".to_string()));
        assert_eq!(unit_of("(1 + 1)d"), Some("d".to_string()));
    }

    #[test]
    fn test_power_and_logic() {
        assert_eq!(unit_of("(3W)^2"), Some("W^2".to_string()));
        assert_eq!(unit_of("(3W)^1"), Some("W".to_string()));
        assert_eq!(unit_of("5W > 2W"), None);
    }

    #[test]
    fn test_functions() {
        assert_eq!(unit_of("AVERAGE({1W, 2W})"), Some("W".to_string()));
        assert_eq!(unit_of("COUNT({1W, 2W})"), None);
        assert_eq!(unit_of("IF(a, 5°C, 6°C)"), Some("degC".to_string()));
        assert_eq!(unit_of("ABS(-5Pa)"), Some("Pa".to_string()));
    }

    #[test]
    fn test_variable_units() {
        let mut units = UnitEnv::new();
        units.assign("power", Unit::get("kW"));
        let expr = parse("power * 2h").unwrap();
        let unit = expr.accept(&mut UnitInferer::with_variables(&units));
        assert_eq!(unit.map(|u| u.name().to_string()), Some("kW.h".to_string()));
    }

    #[test]
    fn test_compound_units_use_given_registry() {
        use crate::parser::Parser;

        let registry = UnitRegistry::new();
        let expr = Parser::new("3flux * 2quanta ^ 3")
            .with_registry(&registry)
            .parse()
            .unwrap();
        let unit = expr.accept(&mut UnitInferer::new().with_registry(&registry));

        assert_eq!(
            unit.map(|u| u.name().to_string()),
            Some("flux.quanta^3".to_string())
        );
        assert!(registry.try_get("quanta^3").is_some());
        assert!(registry.try_get("flux.quanta^3").is_some());
        assert!(Unit::try_get("flux.quanta^3").is_none());
        assert!(Unit::try_get("quanta^3").is_none());
    }
}
