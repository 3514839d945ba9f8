//! 运行时值

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;

use crate::error::{ExpressionError, Result};
use crate::temporal::TemporalObject;

#[derive(Clone)]
pub enum Value {
    Number(f64),
    Bool(bool),
    String(String),
    Date(DateTime<Utc>),
    /// 日期相减的结果
    Duration(TimeDelta),
    /// JSON 片段，支持成员访问
    Json(serde_json::Value),
    /// 集合字面量的求值结果
    List(Vec<Value>),
    /// 时间序列能力对象
    Temporal(Arc<dyn TemporalObject>),
}

impl Value {
    /// 获取值的类型名称
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Duration(_) => "duration",
            Self::Json(_) => "json",
            Self::List(_) => "list",
            Self::Temporal(_) => "temporal",
        }
    }

    /// 数值视图，布尔值按 1/0 处理
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Json(serde_json::Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// 数值视图，失败时返回类型错误
    pub fn to_f64(&self) -> Result<f64> {
        self.as_f64()
            .ok_or_else(|| ExpressionError::type_mismatch("number", self.type_name()))
    }

    /// 真值：布尔值本身，数值大于 0 为真
    pub fn truthy(&self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            Self::Number(n) => Ok(*n > 0.0),
            Self::Json(serde_json::Value::Bool(b)) => Ok(*b),
            other => Err(ExpressionError::type_mismatch("bool", other.type_name())),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            Self::String(s) => parse_datetime(s),
            _ => None,
        }
    }

    /// 将 JSON 标量转换为原生值，对象与数组保持 JSON 形式
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => Self::Number(f),
                None => Self::Json(serde_json::Value::Number(n)),
            },
            serde_json::Value::String(s) => match parse_datetime(&s) {
                Some(date) => Self::Date(date),
                None => Self::String(s),
            },
            other => Self::Json(other),
        }
    }
}

/// 解析 ISO-8601 日期时间
///
/// 支持带时区的 RFC 3339 以及不带时区的 `YYYY-MM-DDTHH:MM:SS`（按 UTC 处理）。
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// 日期的规范文本形式
pub fn format_datetime(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Duration(a), Self::Duration(b)) => a == b,
            (Self::Json(a), Self::Json(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Temporal(a), Self::Temporal(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => f.debug_tuple("Number").field(n).finish(),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Date(d) => f.debug_tuple("Date").field(d).finish(),
            Self::Duration(d) => f.debug_tuple("Duration").field(d).finish(),
            Self::Json(j) => f.debug_tuple("Json").field(j).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Temporal(_) => f.write_str("Temporal(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::String(s) => f.write_str(s),
            Self::Date(d) => f.write_str(&format_datetime(d)),
            Self::Duration(d) => write!(f, "{}s", d.num_milliseconds() as f64 / 1000.0),
            Self::Json(j) => write!(f, "{}", j),
            Self::List(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
            Self::Temporal(_) => f.write_str("<temporal>"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::Json(json)
    }
}

impl From<Arc<dyn TemporalObject>> for Value {
    fn from(temporal: Arc<dyn TemporalObject>) -> Self {
        Self::Temporal(temporal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_truthy() {
        assert!(Value::Bool(true).truthy().unwrap());
        assert!(Value::Number(0.5).truthy().unwrap());
        assert!(!Value::Number(0.0).truthy().unwrap());
        assert!(!Value::Number(-1.0).truthy().unwrap());
        assert!(Value::from("x").truthy().is_err());
    }

    #[test]
    fn test_as_f64_coerces_bool() {
        assert_eq!(Value::Bool(true).as_f64(), Some(1.0));
        assert_eq!(Value::Bool(false).as_f64(), Some(0.0));
        assert_eq!(Value::from("1").as_f64(), None);
    }

    #[test]
    fn test_parse_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(parse_datetime("2024-01-15T10:30:00Z"), Some(expected));
        assert_eq!(parse_datetime("2024-01-15T11:30:00+01:00"), Some(expected));
        assert_eq!(parse_datetime("2024-01-15T10:30:00"), Some(expected));
        assert_eq!(parse_datetime("not a date"), None);
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Value::from_json(json!(3)), Value::Number(3.0));
        assert_eq!(Value::from_json(json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(json!("abc")), Value::from("abc"));
        assert!(matches!(
            Value::from_json(json!("2024-01-15T10:30:00Z")),
            Value::Date(_)
        ));
        assert!(matches!(Value::from_json(json!({"a": 1})), Value::Json(_)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(
            Value::List(vec![Value::Number(1.0), Value::Bool(true)]).to_string(),
            "{1,true}"
        );
    }
}
