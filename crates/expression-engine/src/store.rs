//! 表达式存储管理
//!
//! 使用 DashMap 提供线程安全的编译结果缓存，支持加载、替换、删除、按 ID 求值，
//! 以及与缓存层之间的字节导入导出。

use dashmap::DashMap;
use expression_shared::config::EngineConfig;
use expression_shared::observability::metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::codec;
use crate::compiler::{CompiledExpression, ExpressionCompiler};
use crate::env::ValueEnv;
use crate::error::{ExpressionError, Result};
use crate::evaluator::Evaluator;
use crate::temporal::TemporalSource;
use crate::value::Value;

/// 表达式存储
#[derive(Clone)]
pub struct ExpressionStore {
    /// 编译后的表达式缓存
    expressions: Arc<DashMap<String, CompiledExpression>>,
    compiler: Arc<parking_lot::Mutex<ExpressionCompiler>>,
    /// 时间函数按变量名查找时间序列的来源
    temporal: Option<Arc<dyn TemporalSource>>,
}

impl ExpressionStore {
    pub fn new() -> Self {
        Self::with_compiler(ExpressionCompiler::new(), 0)
    }

    /// 按引擎配置创建，编译限制与预分配容量取自配置
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_compiler(
            ExpressionCompiler::from_config(config),
            config.store_capacity_hint,
        )
    }

    pub fn with_compiler(compiler: ExpressionCompiler, capacity: usize) -> Self {
        Self {
            expressions: Arc::new(DashMap::with_capacity(capacity)),
            compiler: Arc::new(parking_lot::Mutex::new(compiler)),
            temporal: None,
        }
    }

    pub fn with_temporal(mut self, source: Arc<dyn TemporalSource>) -> Self {
        self.temporal = Some(source);
        self
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// 编译并加载表达式，同 ID 的旧版本被替换
    #[instrument(skip(self, source), fields(expression_id = %id))]
    pub fn load(&self, id: &str, source: &str) -> Result<CompiledExpression> {
        let compiled = {
            let mut compiler = self.compiler.lock();
            compiler.compile(id, source)?
        };

        self.expressions.insert(id.to_string(), compiled.clone());
        info!(version = compiled.compile_version, "表达式已加载: {}", id);
        Ok(compiled)
    }

    /// 放入已编译的表达式
    #[instrument(skip(self, compiled), fields(expression_id = %compiled.id))]
    pub fn insert(&self, compiled: CompiledExpression) {
        let id = compiled.id.clone();
        if self.expressions.insert(id.clone(), compiled).is_some() {
            info!("表达式已替换: {}", id);
        } else {
            info!("表达式已插入: {}", id);
        }
    }

    pub fn get(&self, id: &str) -> Option<CompiledExpression> {
        self.expressions.get(id).map(|e| e.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.expressions.contains_key(id)
    }

    #[instrument(skip(self))]
    pub fn remove(&self, id: &str) -> Result<CompiledExpression> {
        match self.expressions.remove(id) {
            Some((_, compiled)) => {
                info!("表达式已删除: {}", id);
                Ok(compiled)
            }
            None => {
                warn!("删除不存在的表达式: {}", id);
                Err(ExpressionError::NotFound { id: id.to_string() })
            }
        }
    }

    /// 所有表达式 ID，按字典序排列
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.expressions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// 批量加载，返回成功加载的 ID
    #[instrument(skip(self, sources))]
    pub fn load_batch<'s>(
        &self,
        sources: impl IntoIterator<Item = (&'s str, &'s str)>,
    ) -> Vec<String> {
        let mut loaded = Vec::new();
        let mut failed = 0usize;

        for (id, source) in sources {
            match self.load(id, source) {
                Ok(_) => loaded.push(id.to_string()),
                Err(e) => {
                    failed += 1;
                    warn!(expression_id = %id, error = %e, "批量加载失败");
                }
            }
        }

        info!("批量加载完成: {} 成功, {} 失败", loaded.len(), failed);
        loaded
    }

    #[instrument(skip(self))]
    pub fn clear(&self) {
        let count = self.expressions.len();
        self.expressions.clear();
        info!("已清空 {} 条表达式", count);
    }

    /// 导出缓存字节
    pub fn export(&self, id: &str) -> Result<Vec<u8>> {
        self.expressions
            .get(id)
            .map(|e| codec::encode(&e.expr))
            .ok_or_else(|| ExpressionError::NotFound { id: id.to_string() })
    }

    /// 从缓存字节恢复
    ///
    /// 解码失败不会报错，条目以占位节点形式存入，对它求值时返回错误。
    #[instrument(skip(self, bytes), fields(expression_id = %id, len = bytes.len()))]
    pub fn restore(&self, id: &str, bytes: &[u8]) -> CompiledExpression {
        let expr = codec::decode(bytes);
        let compiled = self.compiler.lock().compile_tree(id, expr);
        self.expressions.insert(id.to_string(), compiled.clone());
        compiled
    }

    /// 按 ID 求值
    #[instrument(skip(self, env))]
    pub fn evaluate(&self, id: &str, env: &ValueEnv) -> Result<Option<Value>> {
        let compiled = self
            .get(id)
            .ok_or_else(|| ExpressionError::NotFound { id: id.to_string() })?;

        let start = Instant::now();
        let mut evaluator = Evaluator::new(env);
        if let Some(source) = &self.temporal {
            evaluator = evaluator.with_temporal(source.as_ref());
        }
        let result = evaluator.evaluate(&compiled.expr);

        let outcome = match &result {
            Ok(Some(_)) => "value",
            Ok(None) => "absent",
            Err(_) => "error",
        };
        metrics::record_evaluation(outcome, start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            warn!(error = %e, "表达式求值失败");
        }
        result
    }

    /// 存储统计信息
    pub fn stats(&self) -> ExpressionStoreStats {
        let count = self.expressions.len();
        let total_variables: usize = self
            .expressions
            .iter()
            .map(|e| e.unbound_variables.len())
            .sum();

        ExpressionStoreStats {
            count,
            total_variables,
            avg_variables: if count > 0 {
                total_variables as f64 / count as f64
            } else {
                0.0
            },
        }
    }
}

impl Default for ExpressionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 存储统计信息
#[derive(Debug, Clone)]
pub struct ExpressionStoreStats {
    pub count: usize,
    /// 所有表达式引用的变量总数
    pub total_variables: usize,
    pub avg_variables: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporal::{TemporalRegistry, TimeSeries};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_load_and_get() {
        let store = ExpressionStore::new();
        let compiled = store.load("r1", "a + 1").unwrap();

        assert_eq!(compiled.compile_version, 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains("r1"));
        assert_eq!(store.get("r1").unwrap().canonical, "a + 1");
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_load_replaces() {
        let store = ExpressionStore::new();
        store.load("r1", "a + 1").unwrap();
        store.load("r1", "a + 2").unwrap();

        let compiled = store.get("r1").unwrap();
        assert_eq!(compiled.canonical, "a + 2");
        assert_eq!(compiled.compile_version, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_load_invalid_keeps_store_unchanged() {
        let store = ExpressionStore::new();
        assert!(store.load("bad", "(1 + 2").is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove() {
        let store = ExpressionStore::new();
        store.load("r1", "1").unwrap();

        assert!(store.remove("r1").is_ok());
        assert!(!store.contains("r1"));
        assert_eq!(store.remove("r1").unwrap_err().code(), "NOT_FOUND");
    }

    #[test]
    fn test_list_ids_sorted() {
        let store = ExpressionStore::new();
        let loaded = store.load_batch([("b", "1"), ("a", "2"), ("c", "1 +")]);
        assert_eq!(loaded, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(store.list_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_evaluate() {
        let store = ExpressionStore::new();
        store.load("r1", "a * 2 > 10").unwrap();

        let env = ValueEnv::from_pairs([("a", 6.0)]);
        assert_eq!(store.evaluate("r1", &env).unwrap(), Some(Value::Bool(true)));
        assert_eq!(store.evaluate("r1", &ValueEnv::new()).unwrap(), None);
        assert_eq!(
            store.evaluate("missing", &env).unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_evaluate_with_temporal_source() {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let series = TimeSeries::from_points(
            (0..=4).map(|h| (base + chrono::TimeDelta::hours(h), h as f64 * 10.0)),
        );
        let registry = TemporalRegistry::new();
        registry.register("load", Arc::new(series));

        let store = ExpressionStore::new().with_temporal(Arc::new(registry));
        store.load("r1", "MAX(load, 2h)").unwrap();
        assert_eq!(
            store.evaluate("r1", &ValueEnv::new()).unwrap(),
            Some(Value::Number(40.0))
        );
    }

    #[test]
    fn test_export_and_restore() {
        let store = ExpressionStore::new();
        store.load("r1", "(a+1)*b").unwrap();
        let bytes = store.export("r1").unwrap();
        assert_eq!(bytes, b"(a + 1) * b".to_vec());

        let other = ExpressionStore::new();
        let restored = other.restore("r1", &bytes);
        assert_eq!(restored.expr, store.get("r1").unwrap().expr);

        let broken = other.restore("r2", b"(a +");
        assert_eq!(broken.canonical, "FAILED(\"(a +\")");
        let err = other.evaluate("r2", &ValueEnv::new()).unwrap_err();
        assert_eq!(err.code(), "EVALUATION_ERROR");
    }

    #[test]
    fn test_stats() {
        let store = ExpressionStore::new();
        store.load("r1", "a + b").unwrap();
        store.load("r2", "1").unwrap();

        let stats = store.stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_variables, 2);
        assert_eq!(stats.avg_variables, 1.0);
    }

    #[test]
    fn test_from_config() {
        let config = EngineConfig {
            max_depth: 2,
            ..Default::default()
        };
        let store = ExpressionStore::from_config(&config);
        assert!(store.load("deep", "((((1))))").is_err());
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let store = ExpressionStore::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let id = format!("r{}", i);
                    store.load(&id, &format!("x + {}", i)).unwrap();
                    let env = ValueEnv::from_pairs([("x", 1.0)]);
                    store.evaluate(&id, &env).unwrap()
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), Some(Value::Number(1.0 + i as f64)));
        }
        assert_eq!(store.len(), 8);
    }
}
