//! 表达式求值
//!
//! 求值结果为 `Result<Option<Value>>`：引用了值环境中不存在的变量时得到 `Ok(None)`，
//! 表示规则暂时无法求值；类型无法转换等才是错误。
//! 单位标签不参与求值，只有时间函数会读取周期参数上的时间单位。

use tracing::trace;

use crate::env::ValueEnv;
use crate::error::{ExpressionError, Result};
use crate::expr::{Expr, ExprKind, Variable};
use crate::functions::{Builtins, TemporalFunction};
use crate::operators::BinaryOperator;
use crate::temporal::{TemporalSource, TimeWindow};
use crate::units::UnitValue;
use crate::value::Value;
use crate::visitor::Visitor;

type Outcome = Result<Option<Value>>;

/// 求值访问者
pub struct Evaluator<'a> {
    env: &'a ValueEnv,
    temporal: Option<&'a dyn TemporalSource>,
}

impl<'a> Evaluator<'a> {
    pub fn new(env: &'a ValueEnv) -> Self {
        Self {
            env,
            temporal: None,
        }
    }

    /// 变量不在值环境中时，时间函数按名称从这里查找时间序列
    pub fn with_temporal(mut self, source: &'a dyn TemporalSource) -> Self {
        self.temporal = Some(source);
        self
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Outcome {
        expr.accept(self)
    }

    fn lookup(&self, variable: &Variable) -> Option<&'a Value> {
        let env: &'a ValueEnv = self.env;
        env.get(&variable.full_name())
            .or_else(|| env.get(&variable.name))
    }

    fn evaluate_all(&mut self, items: &[Expr]) -> Result<Option<Vec<Value>>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item.accept(self)? {
                Some(value) => values.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(values))
    }

    // ==================== 时间函数 ====================

    /// 第二个参数（去掉一元负号后）带时间单位时走时间序列路径
    fn is_temporal_call(args: &[Expr]) -> bool {
        (2..=3).contains(&args.len()) && period_unit(&args[1]).is_some()
    }

    fn period(&mut self, function: TemporalFunction, arg: &Expr) -> Result<Option<UnitValue>> {
        let (inner, negated) = match &arg.kind {
            ExprKind::Negate(inner) if arg.unit.is_none() => (inner.as_ref(), true),
            _ => (arg, false),
        };
        let unit = inner
            .unit
            .clone()
            .filter(|unit| unit.is_time())
            .ok_or_else(|| {
                ExpressionError::Temporal(format!(
                    "{} 的周期参数必须带时间单位: {}",
                    function.name(),
                    arg
                ))
            })?;
        let Some(value) = inner.accept(self)? else {
            return Ok(None);
        };
        let amount = value.to_f64()?;
        let amount = if negated { -amount } else { amount };
        Ok(Some(UnitValue::new(amount, unit)))
    }

    fn temporal_call(&mut self, function: TemporalFunction, args: &[Expr]) -> Outcome {
        let child = &args[0];
        let ExprKind::Variable(variable) = &child.kind else {
            // 非变量的子表达式没有时间序列可查，按普通值归约
            let Some(value) = child.accept(self)? else {
                return Ok(None);
            };
            return function.reduce(std::slice::from_ref(&value)).map(Some);
        };

        let object = match self.lookup(variable) {
            Some(Value::Temporal(object)) => object.clone(),
            Some(other) => {
                return Err(ExpressionError::Temporal(format!(
                    "变量 {} 的值类型 {} 不支持 {}",
                    variable.full_name(),
                    other.type_name(),
                    function.name()
                )));
            }
            None => match self
                .temporal
                .and_then(|source| source.temporal(&variable.full_name()))
            {
                Some(object) => object,
                None => return Ok(None),
            },
        };

        let Some(start) = self.period(function, &args[1])? else {
            return Ok(None);
        };
        let end = match args.get(2) {
            Some(arg) => match self.period(function, arg)? {
                Some(end) => Some(end),
                None => return Ok(None),
            },
            None => None,
        };

        let window = TimeWindow::new(start, end);
        let (in_range, required) = object.is_in_range(&window);
        if !in_range {
            trace!(
                function = function.name(),
                variable = %variable.full_name(),
                required_seconds = required.num_seconds(),
                "时间序列数据不足"
            );
            return Ok(None);
        }
        function.apply(object.as_ref(), &window).map(Some)
    }
}

/// 周期参数的时间单位，允许外层一个一元负号
fn period_unit(arg: &Expr) -> Option<&crate::units::Unit> {
    let inner = match &arg.kind {
        ExprKind::Negate(inner) if arg.unit.is_none() => inner.as_ref(),
        _ => arg,
    };
    inner.unit.as_ref().filter(|unit| unit.is_time())
}

impl Visitor for Evaluator<'_> {
    type Output = Outcome;

    fn visit_number(&mut self, _expr: &Expr, value: f64) -> Outcome {
        Ok(Some(Value::Number(value)))
    }

    fn visit_string(&mut self, _expr: &Expr, value: &str) -> Outcome {
        Ok(Some(Value::String(value.to_string())))
    }

    fn visit_bool(&mut self, _expr: &Expr, value: bool) -> Outcome {
        Ok(Some(Value::Bool(value)))
    }

    fn visit_date(&mut self, _expr: &Expr, value: &chrono::DateTime<chrono::Utc>) -> Outcome {
        Ok(Some(Value::Date(*value)))
    }

    fn visit_variable(&mut self, _expr: &Expr, variable: &Variable) -> Outcome {
        Ok(self.lookup(variable).cloned())
    }

    fn visit_negate(&mut self, _expr: &Expr, operand: &Expr) -> Outcome {
        let Some(value) = operand.accept(self)? else {
            return Ok(None);
        };
        match value {
            Value::Duration(delta) => Ok(Some(Value::Duration(-delta))),
            other => Ok(Some(Value::Number(-other.to_f64()?))),
        }
    }

    fn visit_not(&mut self, _expr: &Expr, operand: &Expr) -> Outcome {
        let Some(value) = operand.accept(self)? else {
            return Ok(None);
        };
        Ok(Some(Value::Bool(!value.truthy()?)))
    }

    fn visit_binary(&mut self, _expr: &Expr, op: BinaryOperator, left: &Expr, right: &Expr) -> Outcome {
        let Some(left) = left.accept(self)? else {
            return Ok(None);
        };

        // 逻辑操作符短路
        if op.is_logical() {
            let left = left.truthy()?;
            match (op, left) {
                (BinaryOperator::And, false) => return Ok(Some(Value::Bool(false))),
                (BinaryOperator::Or, true) => return Ok(Some(Value::Bool(true))),
                _ => {}
            }
            let Some(right) = right.accept(self)? else {
                return Ok(None);
            };
            return Ok(Some(Value::Bool(right.truthy()?)));
        }

        let Some(right) = right.accept(self)? else {
            return Ok(None);
        };
        Builtins::binary(op, &left, &right).map(Some)
    }

    fn visit_if(&mut self, _expr: &Expr, condition: &Expr, then: &Expr, otherwise: &Expr) -> Outcome {
        let condition = condition.accept(self)?;
        let then = then.accept(self)?;
        let otherwise = otherwise.accept(self)?;
        match condition {
            Some(condition) if condition.truthy()? => Ok(then),
            Some(_) => Ok(otherwise),
            None => Ok(None),
        }
    }

    fn visit_set(&mut self, _expr: &Expr, items: &[Expr]) -> Outcome {
        Ok(self.evaluate_all(items)?.map(Value::List))
    }

    fn visit_call(&mut self, _expr: &Expr, name: &str, args: &[Expr]) -> Outcome {
        if let Some(function) = TemporalFunction::from_name(name) {
            if Self::is_temporal_call(args) {
                return self.temporal_call(function, args);
            }
        }

        // IFNAN 的第一个参数缺失时也取备用值
        if name.eq_ignore_ascii_case("IFNAN") && args.len() == 2 {
            if let Some(value) = args[0].accept(self)? {
                if !value.as_f64().is_some_and(f64::is_nan) {
                    return Ok(Some(value));
                }
            }
            return args[1].accept(self);
        }

        let Some(values) = self.evaluate_all(args)? else {
            return Ok(None);
        };
        Builtins::call(name, &values).map(Some)
    }

    fn visit_property(&mut self, _expr: &Expr, target: &Expr, name: &str) -> Outcome {
        let Some(value) = target.accept(self)? else {
            return Ok(None);
        };
        Builtins::property(&value, name)
    }

    fn visit_failed(&mut self, _expr: &Expr, text: &str, reason: &str) -> Outcome {
        let detail = if reason.is_empty() {
            format!("表达式无法解析: {}", text)
        } else {
            format!("表达式无法解析: {} ({})", text, reason)
        };
        Err(ExpressionError::Evaluation(detail))
    }
}

/// 在值环境上求值
pub fn evaluate(expr: &Expr, env: &ValueEnv) -> Outcome {
    Evaluator::new(env).evaluate(expr)
}

/// 在值环境上求值，时间函数可从 `temporal` 查找时间序列
pub fn evaluate_with(expr: &Expr, env: &ValueEnv, temporal: &dyn TemporalSource) -> Outcome {
    Evaluator::new(env).with_temporal(temporal).evaluate(expr)
}
