//! 作用域环境
//!
//! 环境是一条单向链：子帧查不到的名称会落到父帧继续查找，
//! 赋值只写当前帧。同一结构既用于解析期的声明环境（名称 → 声明类型），
//! 也用于求值期的值环境（名称 → 运行时值）。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Env<T> {
    vars: HashMap<String, T>,
    parent: Option<Arc<Env<T>>>,
}

impl<T> Env<T> {
    pub fn new() -> Self {
        Self {
            vars: HashMap::new(),
            parent: None,
        }
    }

    /// 以 `parent` 为父帧创建子帧
    pub fn push(parent: &Arc<Env<T>>) -> Self {
        Self {
            vars: HashMap::new(),
            parent: Some(Arc::clone(parent)),
        }
    }

    /// 丢弃当前帧，返回父帧
    pub fn pop(self) -> Option<Arc<Env<T>>> {
        self.parent
    }

    /// 写入当前帧，覆盖同名的旧值
    pub fn assign(&mut self, name: impl Into<String>, value: T) -> &mut Self {
        self.vars.insert(name.into(), value);
        self
    }

    /// 从当前帧向根帧查找
    pub fn get(&self, name: &str) -> Option<&T> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.vars.get(name) {
                return Some(value);
            }
            frame = frame.parent.as_deref()?;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 链上所有可见名称，子帧遮蔽的父帧名称只出现一次
    pub fn names(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        let mut frame = Some(self);
        while let Some(current) = frame {
            for name in current.vars.keys() {
                if seen.insert(name.as_str()) {
                    names.push(name.clone());
                }
            }
            frame = current.parent.as_deref();
        }
        names
    }

    /// 链的深度，根帧为 1
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = self.parent.as_deref();
        while let Some(parent) = frame {
            depth += 1;
            frame = parent.parent.as_deref();
        }
        depth
    }
}

impl<T> Default for Env<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 声明类型，仅在解析期用于校验方括号变量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredType {
    Number,
    Bool,
    String,
    Date,
    Json,
    Temporal,
    Any,
}

pub type DeclarationEnv = Env<DeclaredType>;

impl DeclarationEnv {
    /// 由规则编辑工具在解析前登记变量
    pub fn add_variable(&mut self, name: impl Into<String>, declared: DeclaredType) -> &mut Self {
        self.assign(name, declared)
    }
}

pub type ValueEnv = Env<Value>;

impl ValueEnv {
    /// 便捷构造：从 (名称, 值) 列表创建根帧
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut env = Self::new();
        for (name, value) in pairs {
            env.assign(name, value.into());
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_falls_through_to_parent() {
        let mut root = ValueEnv::new();
        root.assign("a", Value::Number(1.0));
        let root = Arc::new(root);

        let mut child = Env::push(&root);
        child.assign("b", Value::Number(2.0));

        assert_eq!(child.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(child.get("b"), Some(&Value::Number(2.0)));
        assert!(root.get("b").is_none());
        assert_eq!(child.depth(), 2);
    }

    #[test]
    fn test_child_shadows_parent() {
        let mut root = ValueEnv::new();
        root.assign("a", Value::Number(1.0));
        let root = Arc::new(root);

        let mut child = Env::push(&root);
        child.assign("a", Value::Number(5.0));

        assert_eq!(child.get("a"), Some(&Value::Number(5.0)));
        assert_eq!(child.names(), vec!["a".to_string()]);

        let parent = child.pop().unwrap();
        assert_eq!(parent.get("a"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_declaration_env() {
        let mut decl = DeclarationEnv::new();
        decl.add_variable("zone air temp", DeclaredType::Number)
            .add_variable("occupied", DeclaredType::Bool);

        assert_eq!(decl.get("zone air temp"), Some(&DeclaredType::Number));
        assert!(decl.contains("occupied"));
        assert!(!decl.contains("missing"));
    }

    #[test]
    fn test_from_pairs() {
        let env = ValueEnv::from_pairs([("x", 2.0), ("y", 3.0)]);
        assert_eq!(env.get("y"), Some(&Value::Number(3.0)));
    }
}
