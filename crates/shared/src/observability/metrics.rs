//! 指标模块
//!
//! 基于 metrics crate 的门面 API 记录表达式编译与求值指标。
//! 本模块不绑定任何 exporter，未安装 recorder 时所有记录操作均为空操作。

pub const COMPILATIONS_TOTAL: &str = "expression_compilations_total";
pub const EVALUATIONS_TOTAL: &str = "expression_evaluations_total";
pub const EVALUATION_DURATION_SECONDS: &str = "expression_evaluation_duration_seconds";
pub const DECODE_FAILURES_TOTAL: &str = "expression_cache_decode_failures_total";

/// 注册指标描述
pub fn describe_all(service_name: &str) {
    metrics::describe_counter!(COMPILATIONS_TOTAL, "Total number of expression compilations");
    metrics::describe_counter!(EVALUATIONS_TOTAL, "Total number of expression evaluations");
    metrics::describe_histogram!(
        EVALUATION_DURATION_SECONDS,
        "Expression evaluation duration in seconds"
    );
    metrics::describe_counter!(
        DECODE_FAILURES_TOTAL,
        "Cached expressions that could not be decoded"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 记录表达式编译
#[inline]
pub fn record_compilation(success: bool) {
    let status = if success { "ok" } else { "error" };
    metrics::counter!(COMPILATIONS_TOTAL, "status" => status).increment(1);
}

/// 记录表达式求值
#[inline]
pub fn record_evaluation(outcome: &'static str, duration_secs: f64) {
    metrics::counter!(EVALUATIONS_TOTAL, "outcome" => outcome).increment(1);
    metrics::histogram!(EVALUATION_DURATION_SECONDS).record(duration_secs);
}

/// 记录缓存解码失败
#[inline]
pub fn record_decode_failure() {
    metrics::counter!(DECODE_FAILURES_TOTAL).increment(1);
}
