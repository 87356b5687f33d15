//! 可观测性：tracing 订阅器与原始输出的有界预览

use serde_json::Value;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

/// 安装全局订阅器；RUST_LOG 可覆盖，默认 info。重复调用是无害的
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .with(fmt::layer())
        .try_init();
}

/// 原始输出的前 `max_chars` 个字符及其总长度（字符数），日志里不打印全文
pub fn preview(raw: &Value, max_chars: usize) -> (String, usize) {
    let text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let len = text.chars().count();
    let head: String = text.chars().take(max_chars).collect();
    (head, len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_preview_is_bounded() {
        let raw = Value::String("é".repeat(600));
        let (head, len) = preview(&raw, 500);
        assert_eq!(len, 600);
        assert_eq!(head.chars().count(), 500);

        let (head, len) = preview(&json!({"a": 1}), 500);
        assert_eq!(head, r#"{"a":1}"#);
        assert_eq!(len, 7);
    }
}
