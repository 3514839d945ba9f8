//! 表达式操作符定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 二元操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    // 算术
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,

    // 相等性
    Equal,
    NotEqual,

    // 关系比较
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,

    // 逻辑
    And,
    Or,
}

impl BinaryOperator {
    /// 规范序列化使用的符号
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Power => "^",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::And => "&",
            Self::Or => "|",
        }
    }

    /// 解析优先级，数值越大结合越紧
    pub fn precedence(&self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Equal | Self::NotEqual => 3,
            Self::Greater | Self::GreaterOrEqual | Self::Less | Self::LessOrEqual => 4,
            Self::Add | Self::Subtract => 5,
            Self::Multiply | Self::Divide => 6,
            Self::Power => 7,
        }
    }

    /// 满足结合律，同类链条可以去掉括号
    pub fn is_associative(&self) -> bool {
        matches!(self, Self::Add | Self::Multiply | Self::And | Self::Or)
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            Self::Add | Self::Subtract | Self::Multiply | Self::Divide | Self::Power
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Greater
                | Self::GreaterOrEqual
                | Self::Less
                | Self::LessOrEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    /// 比较操作符取反：`!(a > b)` 等价于 `a <= b`
    pub fn negated(&self) -> Option<Self> {
        match self {
            Self::Equal => Some(Self::NotEqual),
            Self::NotEqual => Some(Self::Equal),
            Self::Greater => Some(Self::LessOrEqual),
            Self::GreaterOrEqual => Some(Self::Less),
            Self::Less => Some(Self::GreaterOrEqual),
            Self::LessOrEqual => Some(Self::Greater),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_display() {
        assert_eq!(BinaryOperator::And.to_string(), "&");
        assert_eq!(BinaryOperator::Power.to_string(), "^");
        assert_eq!(BinaryOperator::NotEqual.to_string(), "!=");
    }

    #[test]
    fn test_precedence_order() {
        assert!(BinaryOperator::Or.precedence() < BinaryOperator::And.precedence());
        assert!(BinaryOperator::Equal.precedence() < BinaryOperator::Less.precedence());
        assert!(BinaryOperator::Add.precedence() < BinaryOperator::Multiply.precedence());
        assert!(BinaryOperator::Multiply.precedence() < BinaryOperator::Power.precedence());
    }

    #[test]
    fn test_negated_comparison() {
        assert_eq!(
            BinaryOperator::Greater.negated(),
            Some(BinaryOperator::LessOrEqual)
        );
        assert_eq!(BinaryOperator::Add.negated(), None);
    }

    #[test]
    fn test_operator_serde() {
        let json = serde_json::to_string(&BinaryOperator::GreaterOrEqual).unwrap();
        assert_eq!(json, "\"greater_or_equal\"");
    }
}
