//! 内置运算与函数
//!
//! 与树结构无关的值级语义：二元操作符、属性访问、普通函数调用，
//! 以及时间函数在没有时间序列可用时的集合归约。

use chrono::{DateTime, Datelike, TimeDelta, Timelike, Utc};
use std::cmp::Ordering;

use crate::error::{ExpressionError, Result};
use crate::operators::BinaryOperator;
use crate::temporal::{TemporalObject, TimeWindow, population_std};
use crate::value::Value;

/// 时间函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalFunction {
    Average,
    Sum,
    Min,
    Max,
    Count,
    Any,
    All,
    Delta,
    Slope,
    StandardDeviation,
    Forecast,
}

impl TemporalFunction {
    /// 按函数名识别，大小写不敏感，`STND` 为 `STDDEV` 的别名
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name.to_ascii_uppercase().as_str() {
            "AVERAGE" => Self::Average,
            "SUM" => Self::Sum,
            "MIN" => Self::Min,
            "MAX" => Self::Max,
            "COUNT" => Self::Count,
            "ANY" => Self::Any,
            "ALL" => Self::All,
            "DELTA" => Self::Delta,
            "SLOPE" => Self::Slope,
            "STDDEV" | "STND" => Self::StandardDeviation,
            "FORECAST" => Self::Forecast,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Count => "COUNT",
            Self::Any => "ANY",
            Self::All => "ALL",
            Self::Delta => "DELTA",
            Self::Slope => "SLOPE",
            Self::StandardDeviation => "STDDEV",
            Self::Forecast => "FORECAST",
        }
    }

    /// 结果是否为无量纲（计数或逻辑值）
    pub fn is_dimensionless(&self) -> bool {
        matches!(self, Self::Count | Self::Any | Self::All)
    }

    /// 委托给时间序列能力对象
    pub fn apply(&self, object: &dyn TemporalObject, window: &TimeWindow) -> Result<Value> {
        match self {
            Self::Average => object.average(window),
            Self::Sum => object.sum(window),
            Self::Min => object.min(window),
            Self::Max => object.max(window),
            Self::Count => object.count(window),
            Self::Any => object.any(window),
            Self::All => object.all(window),
            Self::Delta => object.delta(window),
            Self::Slope => object.slope(window),
            Self::StandardDeviation => object.standard_deviation(window),
            Self::Forecast => object.forecast(window),
        }
    }

    /// 普通值上的归约
    ///
    /// 单个参数且为集合时归约集合元素，单个标量原样返回（逻辑函数转为布尔），
    /// 多个参数视为一个集合。
    pub fn reduce(&self, args: &[Value]) -> Result<Value> {
        let items: &[Value] = match args {
            [Value::List(items)] => items,
            [single] => return self.reduce_single(single),
            _ => args,
        };

        match self {
            Self::Average => {
                let numbers = numbers(items)?;
                if numbers.is_empty() {
                    return Err(ExpressionError::Evaluation("AVERAGE 的集合为空".to_string()));
                }
                Ok(Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64))
            }
            Self::Sum => Ok(Value::Number(numbers(items)?.iter().sum())),
            Self::Min => extreme(items, Ordering::Less),
            Self::Max => extreme(items, Ordering::Greater),
            Self::Count => {
                let mut count = 0usize;
                for item in items {
                    if item.truthy()? {
                        count += 1;
                    }
                }
                Ok(Value::Number(count as f64))
            }
            Self::Any => {
                for item in items {
                    if item.truthy()? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Self::All => {
                for item in items {
                    if !item.truthy()? {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Self::Delta | Self::Slope => Ok(Value::Number(0.0)),
            Self::StandardDeviation => Ok(Value::Number(population_std(&numbers(items)?))),
            Self::Forecast => items
                .last()
                .cloned()
                .ok_or_else(|| ExpressionError::Evaluation("FORECAST 的集合为空".to_string())),
        }
    }

    fn reduce_single(&self, value: &Value) -> Result<Value> {
        match self {
            Self::Any | Self::All => Ok(Value::Bool(value.truthy()?)),
            Self::Count => Ok(Value::Number(if value.truthy()? { 1.0 } else { 0.0 })),
            Self::Delta | Self::Slope | Self::StandardDeviation => {
                value.to_f64()?;
                Ok(Value::Number(0.0))
            }
            Self::Average | Self::Sum | Self::Min | Self::Max | Self::Forecast => {
                Ok(value.clone())
            }
        }
    }
}

fn numbers(items: &[Value]) -> Result<Vec<f64>> {
    items.iter().map(Value::to_f64).collect()
}

fn extreme(items: &[Value], wanted: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for item in items {
        best = match best {
            None => Some(item),
            Some(current) => match Builtins::compare(item, current)? {
                Some(ordering) if ordering == wanted => Some(item),
                _ => Some(current),
            },
        };
    }
    best.cloned()
        .ok_or_else(|| ExpressionError::Evaluation("MIN/MAX 的集合为空".to_string()))
}

/// 内置运算
pub struct Builtins;

impl Builtins {
    // ==================== 二元操作符 ====================

    /// 计算二元操作（逻辑操作符不短路）
    pub fn binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value> {
        match op {
            BinaryOperator::Add => Self::add(left, right),
            BinaryOperator::Subtract => Self::subtract(left, right),
            BinaryOperator::Multiply => Self::arithmetic(left, right, |a, b| a * b),
            BinaryOperator::Divide => Self::arithmetic(left, right, |a, b| a / b),
            BinaryOperator::Power => Self::arithmetic(left, right, f64::powf),
            BinaryOperator::Equal => Ok(Value::Bool(Self::equals(left, right))),
            BinaryOperator::NotEqual => Ok(Value::Bool(!Self::equals(left, right))),
            BinaryOperator::Greater => Self::ordered(left, right, |o| o == Ordering::Greater),
            BinaryOperator::GreaterOrEqual => {
                Self::ordered(left, right, |o| o != Ordering::Less)
            }
            BinaryOperator::Less => Self::ordered(left, right, |o| o == Ordering::Less),
            BinaryOperator::LessOrEqual => Self::ordered(left, right, |o| o != Ordering::Greater),
            BinaryOperator::And => Ok(Value::Bool(left.truthy()? && right.truthy()?)),
            BinaryOperator::Or => Ok(Value::Bool(left.truthy()? || right.truthy()?)),
        }
    }

    fn arithmetic(left: &Value, right: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value> {
        Ok(Value::Number(f(left.to_f64()?, right.to_f64()?)))
    }

    fn add(left: &Value, right: &Value) -> Result<Value> {
        match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::Date(d), Value::Duration(delta)) | (Value::Duration(delta), Value::Date(d)) => {
                shift(d, *delta).map(Value::Date)
            }
            (Value::Duration(a), Value::Duration(b)) => a
                .checked_add(b)
                .map(Value::Duration)
                .ok_or_else(|| ExpressionError::Evaluation("时长相加溢出".to_string())),
            _ => Self::arithmetic(left, right, |a, b| a + b),
        }
    }

    fn subtract(left: &Value, right: &Value) -> Result<Value> {
        match (left, right) {
            (Value::Date(a), Value::Date(b)) => Ok(Value::Duration(*a - *b)),
            (Value::Date(d), Value::Duration(delta)) => shift(d, -*delta).map(Value::Date),
            (Value::Duration(a), Value::Duration(b)) => a
                .checked_sub(b)
                .map(Value::Duration)
                .ok_or_else(|| ExpressionError::Evaluation("时长相减溢出".to_string())),
            _ => Self::arithmetic(left, right, |a, b| a - b),
        }
    }

    /// 相等比较，类型不同时视为不等
    pub fn equals(left: &Value, right: &Value) -> bool {
        match (left.as_f64(), right.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => match (left, right) {
                (Value::Date(a), Value::String(s)) | (Value::String(s), Value::Date(a)) => {
                    crate::value::parse_datetime(s).is_some_and(|b| *a == b)
                }
                _ => left == right,
            },
        }
    }

    /// 有序比较，NaN 参与时返回 None
    pub fn compare(left: &Value, right: &Value) -> Result<Option<Ordering>> {
        if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
            return Ok(a.partial_cmp(&b));
        }
        match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
            (Value::Date(a), Value::Date(b)) => Ok(Some(a.cmp(b))),
            (Value::Duration(a), Value::Duration(b)) => Ok(Some(a.cmp(b))),
            _ => Err(ExpressionError::type_mismatch(
                left.type_name(),
                right.type_name(),
            )),
        }
    }

    fn ordered(left: &Value, right: &Value, test: impl Fn(Ordering) -> bool) -> Result<Value> {
        Ok(Value::Bool(Self::compare(left, right)?.is_some_and(test)))
    }

    // ==================== 属性访问 ====================

    /// 读取属性，JSON 中不存在的成员返回 None
    pub fn property(value: &Value, name: &str) -> Result<Option<Value>> {
        match value {
            Value::Date(date) => date_part(date, name).map(Some),
            Value::Duration(delta) => duration_part(delta, name).map(Some),
            Value::String(text) if name.eq_ignore_ascii_case("length") => {
                Ok(Some(Value::Number(text.chars().count() as f64)))
            }
            Value::String(text) => match serde_json::from_str::<serde_json::Value>(text) {
                Ok(json @ serde_json::Value::Object(_)) => Ok(json_member(&json, name)),
                _ => Err(no_property(value, name)),
            },
            Value::Json(json) => Ok(json_member(json, name)),
            _ => Err(no_property(value, name)),
        }
    }

    // ==================== 函数调用 ====================

    /// 调用普通函数，函数名大小写不敏感
    pub fn call(name: &str, args: &[Value]) -> Result<Value> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "POW" => {
                let [a, b] = numeric_args::<2>(&upper, args)?;
                Ok(Value::Number(a.powf(b)))
            }
            "ATAN2" => {
                let [y, x] = numeric_args::<2>(&upper, args)?;
                Ok(Value::Number(y.atan2(x)))
            }
            "MOD" => {
                let [a, b] = numeric_args::<2>(&upper, args)?;
                Ok(Value::Number(a % b))
            }
            "IFNAN" => {
                let [a, b] = numeric_args::<2>(&upper, args)?;
                Ok(Value::Number(if a.is_nan() { b } else { a }))
            }
            "DEADBAND" => {
                let [value, min, max] = numeric_args::<3>(&upper, args)?;
                Ok(Value::Number(deadband(value, min, max)))
            }
            "ISNAN" => {
                let [a] = numeric_args::<1>(&upper, args)?;
                Ok(Value::Bool(a.is_nan()))
            }
            "ABS" | "ACOS" | "ASIN" | "ATAN" | "CEILING" | "COS" | "EXP" | "FLOOR" | "LOG"
            | "LOG10" | "ROUND" | "SIGN" | "SIN" | "SQRT" | "TAN" => {
                let [a] = numeric_args::<1>(&upper, args)?;
                Ok(Value::Number(unary_math(&upper, a)))
            }
            "HOUR" | "MINUTE" | "DAY" | "DAYOFWEEK" | "MONTH" | "YEAR" => {
                let [arg] = exact::<1>(&upper, args)?;
                let date = arg
                    .as_date()
                    .ok_or_else(|| ExpressionError::type_mismatch("date", arg.type_name()))?;
                date_part(&date, &upper)
            }
            "TOUPPER" | "TOLOWER" | "TRIM" => {
                let [arg] = exact::<1>(&upper, args)?;
                let text = string_arg(arg)?;
                let result = match upper.as_str() {
                    "TOUPPER" => text.to_uppercase(),
                    "TOLOWER" => text.to_lowercase(),
                    _ => text.trim().to_string(),
                };
                Ok(Value::String(result))
            }
            "CONTAINS" | "STARTSWITH" | "ENDSWITH" => {
                let [text, pattern] = exact::<2>(&upper, args)?;
                let (text, pattern) = (string_arg(text)?, string_arg(pattern)?);
                let found = match upper.as_str() {
                    "CONTAINS" => text.contains(pattern),
                    "STARTSWITH" => text.starts_with(pattern),
                    _ => text.ends_with(pattern),
                };
                Ok(Value::Bool(found))
            }
            _ => match TemporalFunction::from_name(&upper) {
                Some(function) => function.reduce(args),
                None => Err(ExpressionError::UnknownFunction {
                    name: name.to_string(),
                }),
            },
        }
    }

    /// 函数是否为已知的内置函数
    pub fn is_known(name: &str) -> bool {
        const NAMES: &[&str] = &[
            "POW", "ATAN2", "MOD", "IFNAN", "DEADBAND", "ISNAN", "ABS", "ACOS", "ASIN", "ATAN",
            "CEILING", "COS", "EXP", "FLOOR", "LOG", "LOG10", "ROUND", "SIGN", "SIN", "SQRT",
            "TAN", "HOUR", "MINUTE", "DAY", "DAYOFWEEK", "MONTH", "YEAR", "TOUPPER", "TOLOWER",
            "TRIM", "CONTAINS", "STARTSWITH", "ENDSWITH",
        ];
        let upper = name.to_ascii_uppercase();
        NAMES.contains(&upper.as_str()) || TemporalFunction::from_name(&upper).is_some()
    }
}

/// 落在 [min, max] 内为 0，否则为到越过的边界的距离
pub fn deadband(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min - value
    } else if value > max {
        value - max
    } else {
        0.0
    }
}

fn unary_math(name: &str, a: f64) -> f64 {
    match name {
        "ABS" => a.abs(),
        "ACOS" => a.acos(),
        "ASIN" => a.asin(),
        "ATAN" => a.atan(),
        "CEILING" => a.ceil(),
        "COS" => a.cos(),
        "EXP" => a.exp(),
        "FLOOR" => a.floor(),
        "LOG" => a.ln(),
        "LOG10" => a.log10(),
        "ROUND" => a.round(),
        "SIGN" if a == 0.0 || a.is_nan() => a,
        "SIGN" => a.signum(),
        "SIN" => a.sin(),
        "SQRT" => a.sqrt(),
        "TAN" => a.tan(),
        _ => f64::NAN,
    }
}

fn exact<'v, const N: usize>(name: &str, args: &'v [Value]) -> Result<&'v [Value; N]> {
    args.try_into().map_err(|_| ExpressionError::Arity {
        function: name.to_string(),
        expected: N.to_string(),
        actual: args.len(),
    })
}

fn numeric_args<const N: usize>(name: &str, args: &[Value]) -> Result<[f64; N]> {
    let args = exact::<N>(name, args)?;
    let mut numbers = [0.0; N];
    for (slot, arg) in numbers.iter_mut().zip(args) {
        *slot = arg.to_f64()?;
    }
    Ok(numbers)
}

fn string_arg(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| ExpressionError::type_mismatch("string", value.type_name()))
}

fn shift(date: &DateTime<Utc>, delta: TimeDelta) -> Result<DateTime<Utc>> {
    date.checked_add_signed(delta)
        .ok_or_else(|| ExpressionError::Evaluation("日期运算越界".to_string()))
}

fn no_property(value: &Value, name: &str) -> ExpressionError {
    ExpressionError::Evaluation(format!("{} 类型没有属性 {}", value.type_name(), name))
}

/// 日期分量，按 UTC 计算，星期日为 0
fn date_part(date: &DateTime<Utc>, name: &str) -> Result<Value> {
    let part = match name.to_ascii_uppercase().as_str() {
        "YEAR" => date.year() as f64,
        "MONTH" => date.month() as f64,
        "DAY" => date.day() as f64,
        "HOUR" => date.hour() as f64,
        "MINUTE" => date.minute() as f64,
        "SECOND" => date.second() as f64,
        "DAYOFWEEK" => date.weekday().num_days_from_sunday() as f64,
        _ => return Err(no_property(&Value::Date(*date), name)),
    };
    Ok(Value::Number(part))
}

fn duration_part(delta: &TimeDelta, name: &str) -> Result<Value> {
    let seconds = delta.num_milliseconds() as f64 / 1000.0;
    let part = match name.to_ascii_uppercase().as_str() {
        "TOTALDAYS" => seconds / 86_400.0,
        "TOTALHOURS" => seconds / 3_600.0,
        "TOTALMINUTES" => seconds / 60.0,
        "TOTALSECONDS" => seconds,
        "DAYS" => delta.num_days() as f64,
        "HOURS" => (delta.num_hours() % 24) as f64,
        "MINUTES" => (delta.num_minutes() % 60) as f64,
        _ => return Err(no_property(&Value::Duration(*delta), name)),
    };
    Ok(Value::Number(part))
}

/// JSON 成员查找：先精确匹配，再忽略大小写
fn json_member(json: &serde_json::Value, name: &str) -> Option<Value> {
    let object = json.as_object()?;
    object
        .get(name)
        .or_else(|| {
            object
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, member)| member)
        })
        .filter(|member| !member.is_null())
        .map(|member| Value::from_json(member.clone()))
}
