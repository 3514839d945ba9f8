//! 表达式树
//!
//! 树节点不可变：所有变换都返回新树，输入树保持原样。
//! 每个节点都可以带一个单位标签，例如 `(5 + 5)h` 的加法节点带有单位 `h`。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::operators::BinaryOperator;
use crate::units::Unit;
use crate::value::Value;
use crate::visitor::{Rewriter, Visitor};

/// 变量引用，`[A;1]` 形式的名称带版本号
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn versioned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    /// 环境查找使用的完整名称
    pub fn full_name(&self) -> String {
        match &self.version {
            Some(version) => format!("{};{}", self.name, version),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ExprKind {
    Number(f64),
    String(String),
    Bool(bool),
    Date(DateTime<Utc>),
    Variable(Variable),
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Binary {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Set(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    /// 无法解析的文本占位，求值时报错
    Failed {
        text: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, unit: None }
    }

    pub fn number(value: f64) -> Self {
        Self::new(ExprKind::Number(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ExprKind::String(value.into()))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(ExprKind::Bool(value))
    }

    pub fn date(value: DateTime<Utc>) -> Self {
        Self::new(ExprKind::Date(value))
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Variable(Variable::new(name)))
    }

    pub fn negate(operand: Expr) -> Self {
        Self::new(ExprKind::Negate(Box::new(operand)))
    }

    pub fn not(operand: Expr) -> Self {
        Self::new(ExprKind::Not(Box::new(operand)))
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Add, left, right)
    }

    pub fn sub(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Subtract, left, right)
    }

    pub fn mul(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Multiply, left, right)
    }

    pub fn div(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Divide, left, right)
    }

    pub fn pow(left: Expr, right: Expr) -> Self {
        Self::binary(BinaryOperator::Power, left, right)
    }

    pub fn if_then_else(condition: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::new(ExprKind::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub fn set(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::Set(items))
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call {
            name: name.into(),
            args,
        })
    }

    pub fn property(target: Expr, name: impl Into<String>) -> Self {
        Self::new(ExprKind::Property {
            target: Box::new(target),
            name: name.into(),
        })
    }

    pub fn failed(text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ExprKind::Failed {
            text: text.into(),
            reason: reason.into(),
        })
    }

    /// 替换单位标签
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    /// 仅在自身没有单位时补上单位
    pub fn with_unit_or_keep(mut self, unit: Option<Unit>) -> Self {
        if self.unit.is_none() {
            self.unit = unit;
        }
        self
    }

    pub fn unit(&self) -> Option<&Unit> {
        self.unit.as_ref()
    }

    /// 常量节点（数值、字符串、布尔、日期）
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Number(_) | ExprKind::String(_) | ExprKind::Bool(_) | ExprKind::Date(_)
        )
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.kind {
            ExprKind::Number(n) => Some(n),
            _ => None,
        }
    }

    /// 常量节点转换为运行时值
    pub fn constant_value(&self) -> Option<Value> {
        match &self.kind {
            ExprKind::Number(n) => Some(Value::Number(*n)),
            ExprKind::String(s) => Some(Value::String(s.clone())),
            ExprKind::Bool(b) => Some(Value::Bool(*b)),
            ExprKind::Date(d) => Some(Value::Date(*d)),
            _ => None,
        }
    }

    /// 运行时值转换为常量节点，无法表示为字面量的值返回 None
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self::number(*n)),
            Value::Bool(b) => Some(Self::boolean(*b)),
            Value::String(s) => Some(Self::string(s.clone())),
            Value::Date(d) => Some(Self::date(*d)),
            _ => None,
        }
    }

    /// 直接子节点
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Number(_)
            | ExprKind::String(_)
            | ExprKind::Bool(_)
            | ExprKind::Date(_)
            | ExprKind::Variable(_)
            | ExprKind::Failed { .. } => Vec::new(),
            ExprKind::Negate(operand) | ExprKind::Not(operand) => vec![&**operand],
            ExprKind::Binary { left, right, .. } => vec![&**left, &**right],
            ExprKind::If {
                condition,
                then,
                otherwise,
            } => vec![&**condition, &**then, &**otherwise],
            ExprKind::Set(items) => items.iter().collect(),
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Property { target, .. } => vec![&**target],
        }
    }

    /// 是否引用了指定变量
    pub fn references(&self, name: &str) -> bool {
        match &self.kind {
            ExprKind::Variable(var) => var.name == name || var.full_name() == name,
            _ => self.children().into_iter().any(|c| c.references(name)),
        }
    }

    /// 双分派入口
    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) -> V::Output {
        match &self.kind {
            ExprKind::Number(n) => visitor.visit_number(self, *n),
            ExprKind::String(s) => visitor.visit_string(self, s),
            ExprKind::Bool(b) => visitor.visit_bool(self, *b),
            ExprKind::Date(d) => visitor.visit_date(self, d),
            ExprKind::Variable(var) => visitor.visit_variable(self, var),
            ExprKind::Negate(operand) => visitor.visit_negate(self, operand),
            ExprKind::Not(operand) => visitor.visit_not(self, operand),
            ExprKind::Binary { op, left, right } => visitor.visit_binary(self, *op, left, right),
            ExprKind::If {
                condition,
                then,
                otherwise,
            } => visitor.visit_if(self, condition, then, otherwise),
            ExprKind::Set(items) => visitor.visit_set(self, items),
            ExprKind::Call { name, args } => visitor.visit_call(self, name, args),
            ExprKind::Property { target, name } => visitor.visit_property(self, target, name),
            ExprKind::Failed { text, reason } => visitor.visit_failed(self, text, reason),
        }
    }

    /// 改写入口，返回新树
    pub fn rewrite<R: Rewriter + ?Sized>(&self, rewriter: &mut R) -> Result<Expr> {
        match &self.kind {
            ExprKind::Number(_) | ExprKind::String(_) | ExprKind::Bool(_) | ExprKind::Date(_) => {
                rewriter.rewrite_constant(self)
            }
            ExprKind::Variable(var) => rewriter.rewrite_variable(self, var),
            ExprKind::Negate(operand) => rewriter.rewrite_negate(self, operand),
            ExprKind::Not(operand) => rewriter.rewrite_not(self, operand),
            ExprKind::Binary { op, left, right } => {
                rewriter.rewrite_binary(self, *op, left, right)
            }
            ExprKind::If {
                condition,
                then,
                otherwise,
            } => rewriter.rewrite_if(self, condition, then, otherwise),
            ExprKind::Set(items) => rewriter.rewrite_set(self, items),
            ExprKind::Call { name, args } => rewriter.rewrite_call(self, name, args),
            ExprKind::Property { target, name } => rewriter.rewrite_property(self, target, name),
            ExprKind::Failed { .. } => rewriter.rewrite_failed(self),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::serializer::serialize(self))
    }
}
