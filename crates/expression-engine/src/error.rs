//! 表达式引擎错误类型

use thiserror::Error;

/// 语法错误，携带出错位置（字节偏移）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (位置 {start}..{end})")]
pub struct ParseError {
    pub message: String,
    pub start: usize,
    pub end: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            message: message.into(),
            start,
            end,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("表达式解析失败: {0}")]
    Parse(#[from] ParseError),

    #[error("类型不匹配: 期望 {expected}, 实际 {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("表达式求值失败: {0}")]
    Evaluation(String),

    #[error("未知函数: {name}")]
    UnknownFunction { name: String },

    #[error("函数 {function} 参数个数错误: 期望 {expected}, 实际 {actual}")]
    Arity {
        function: String,
        expected: String,
        actual: usize,
    },

    #[error("不支持的变换: {0}")]
    UnsupportedTransformation(String),

    #[error("时间序列运算失败: {0}")]
    Temporal(String),

    #[error("表达式未找到: {id}")]
    NotFound { id: String },

    #[error("JSON 序列化错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExpressionError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::TypeMismatch { .. } => "TYPE_MISMATCH",
            Self::Evaluation(_) => "EVALUATION_ERROR",
            Self::UnknownFunction { .. } => "UNKNOWN_FUNCTION",
            Self::Arity { .. } => "ARITY_MISMATCH",
            Self::UnsupportedTransformation(_) => "UNSUPPORTED_TRANSFORMATION",
            Self::Temporal(_) => "TEMPORAL_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Json(_) => "JSON_ERROR",
        }
    }

    /// 是否为语法层面的错误
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse(_))
    }
}

pub type Result<T> = std::result::Result<T, ExpressionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ExpressionError::from(ParseError::new("括号不匹配", 3, 4));
        assert!(err.is_parse_error());
        assert_eq!(err.code(), "PARSE_ERROR");
        assert!(err.to_string().contains("3..4"));
    }

    #[test]
    fn test_type_mismatch_code() {
        let err = ExpressionError::type_mismatch("number", "string");
        assert_eq!(err.code(), "TYPE_MISMATCH");
        assert!(!err.is_parse_error());
    }
}
