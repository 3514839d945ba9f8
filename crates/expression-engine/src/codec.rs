//! 缓存编解码
//!
//! 缓存中只保存规范文本的 UTF-8 字节。读取路径不会失败：无法还原的条目降级为
//! `FAILED("...")` 占位节点，错误推迟到对它求值时才出现。

use expression_shared::observability::metrics;
use tracing::warn;

use crate::error::Result;
use crate::expr::Expr;
use crate::parser::parse;
use crate::serializer::serialize;

/// 编码为规范文本字节
pub fn encode(expr: &Expr) -> Vec<u8> {
    serialize(expr).into_bytes()
}

/// 从缓存字节还原表达式
pub fn decode(bytes: &[u8]) -> Expr {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            let lossy = String::from_utf8_lossy(bytes);
            return placeholder(&lossy, format!("无效的 UTF-8: {}", e));
        }
    };

    match parse(text) {
        Ok(expr) => expr,
        Err(e) => placeholder(text, e.to_string()),
    }
}

fn placeholder(text: &str, reason: String) -> Expr {
    warn!(text = %text, reason = %reason, "缓存表达式无法解码，使用占位节点");
    metrics::record_decode_failure();
    Expr::failed(text, reason)
}

/// 语法树的 JSON 形式
pub fn to_json(expr: &Expr) -> Result<String> {
    Ok(serde_json::to_string(expr)?)
}

pub fn from_json(json: &str) -> Result<Expr> {
    Ok(serde_json::from_str(json)?)
}
