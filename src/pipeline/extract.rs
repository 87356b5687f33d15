//! 结构化抽取：把 Agent 的原始输出转成可用的结构
//!
//! 按顺序尝试，首个成功者胜出：
//! 1. 非文本（已是结构化值）原样返回
//! 2. 去掉 ``` 代码围栏（含可选语言标记）后整体按 JSON 解析
//! 3. 第一个 `[` 到最后一个 `]` 之间按数组解析
//! 4. 第一个 `{` 到最后一个 `}` 之间按对象解析
//! 5. 从每个 `[` / `{` 起做流式解析，取第一个完整的 JSON 值（容忍尾随文字）
//! 6. 全部失败则返回原始文本
//!
//! 抽取永不报错；拿到 `Extracted::Text` 的调用方按纯文本降级展示。

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

/// 流式解析时最多尝试的起始位置数
const MAX_SCAN_STARTS: usize = 16;

/// 抽取结果：结构化值或原始文本
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Extracted {
    Structured(Value),
    Text(String),
}

impl Extracted {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Extracted::Structured(v) => Some(v),
            Extracted::Text(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        self.as_structured().and_then(Value::as_array)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Extracted::Text(_))
    }

    /// 转回 JSON 值（文本包装为字符串）
    pub fn into_value(self) -> Value {
        match self {
            Extracted::Structured(v) => v,
            Extracted::Text(s) => Value::String(s),
        }
    }
}

/// 命中的抽取策略（用于日志）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    AlreadyStructured,
    Direct,
    ArraySpan,
    ObjectSpan,
    Scan,
    Passthrough,
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // 开头围栏可带语言标记（```json\n），其余 ``` 直接去掉
        Regex::new(r"```(?:[A-Za-z0-9_+\-]+[ \t]*(?:\r?\n|$))?").expect("static regex")
    })
}

/// 去掉所有代码围栏标记并 trim
pub fn strip_fences(text: &str) -> String {
    fence_re().replace_all(text, "").trim().to_string()
}

/// 结构化抽取器
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredExtractor;

impl StructuredExtractor {
    pub fn new() -> Self {
        Self
    }

    /// 对任意原始值抽取
    pub fn extract(&self, raw: &Value) -> Extracted {
        self.extract_with_strategy(raw).0
    }

    pub fn extract_str(&self, raw: &str) -> Extracted {
        self.extract_text(raw).0
    }

    /// 抽取并返回命中的策略
    pub fn extract_with_strategy(&self, raw: &Value) -> (Extracted, Strategy) {
        let (extracted, strategy) = match raw {
            Value::String(text) => self.extract_text(text),
            other => (Extracted::Structured(other.clone()), Strategy::AlreadyStructured),
        };
        tracing::debug!("extraction strategy: {:?}", strategy);
        (extracted, strategy)
    }

    fn extract_text(&self, raw: &str) -> (Extracted, Strategy) {
        let cleaned = strip_fences(raw);

        if let Ok(v) = serde_json::from_str::<Value>(&cleaned) {
            return (Extracted::Structured(v), Strategy::Direct);
        }
        if let Some(v) = parse_span(&cleaned, '[', ']').filter(Value::is_array) {
            return (Extracted::Structured(v), Strategy::ArraySpan);
        }
        if let Some(v) = parse_span(&cleaned, '{', '}').filter(Value::is_object) {
            return (Extracted::Structured(v), Strategy::ObjectSpan);
        }
        if let Some(v) = scan_first_value(&cleaned) {
            return (Extracted::Structured(v), Strategy::Scan);
        }
        tracing::debug!("extraction fell back to raw text ({} chars)", raw.len());
        (Extracted::Text(raw.to_string()), Strategy::Passthrough)
    }

    /// 列表型结果（如 reviews）的抽取：对象包装时取 `canonical_key` 字段，
    /// 否则取第一个数组字段
    pub fn extract_list(&self, raw: &Value, canonical_key: &str) -> Extracted {
        match self.extract(raw) {
            Extracted::Structured(Value::Object(map)) => {
                Extracted::Structured(unwrap_collection(map, canonical_key))
            }
            other => other,
        }
    }
}

/// 首个 open 到最后一个 close 之间的子串按 JSON 解析
fn parse_span(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if start >= end {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// 从每个候选起点做流式解析，取第一个完整的数组/对象
fn scan_first_value(text: &str) -> Option<Value> {
    text.match_indices(|c| c == '[' || c == '{')
        .take(MAX_SCAN_STARTS)
        .find_map(|(start, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(v)) if v.is_array() || v.is_object() => Some(v),
                _ => None,
            }
        })
}

fn unwrap_collection(map: Map<String, Value>, canonical_key: &str) -> Value {
    if let Some(Value::Array(items)) = map.get(canonical_key) {
        return Value::Array(items.clone());
    }
    if let Some(items) = map.values().find(|v| v.is_array()) {
        return items.clone();
    }
    Value::Object(map)
}

/// 解析 `Key: value` 行格式的画像文本（规范化阶段偶尔输出散文而非 JSON）
pub fn parse_profile_lines(text: &str) -> Map<String, Value> {
    let mut profile = Map::new();
    for line in text.lines() {
        let Some((raw_key, value)) = line.split_once(':') else {
            continue;
        };
        let key = raw_key
            .replace("**", "")
            .trim()
            .trim_start_matches(['-', '*', ' '])
            .to_lowercase()
            .replace(' ', "_");
        let value = value.trim();
        if key.is_empty() || value.is_empty() || value.eq_ignore_ascii_case("not specified") {
            continue;
        }
        let value = if key == "preferred_locations" {
            Value::Array(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )
        } else {
            Value::String(value.to_string())
        };
        profile.insert(key, value);
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(s: &str) -> Extracted {
        StructuredExtractor::new().extract_str(s)
    }

    #[test]
    fn test_fenced_json_array() {
        let out = extract("```json\n[{\"university\":\"A\"}]\n```");
        assert_eq!(out, Extracted::Structured(json!([{"university": "A"}])));
        assert_eq!(out.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn test_plain_refusal_is_passthrough() {
        let out = extract("Sorry, I cannot comply");
        assert_eq!(out, Extracted::Text("Sorry, I cannot comply".to_string()));
    }

    #[test]
    fn test_structured_input_unchanged() {
        let raw = json!({"a": [1, 2]});
        let (out, strategy) = StructuredExtractor::new().extract_with_strategy(&raw);
        assert_eq!(out, Extracted::Structured(raw));
        assert_eq!(strategy, Strategy::AlreadyStructured);
    }

    #[test]
    fn test_prose_around_array() {
        let out = extract("Here are your matches:\n[{\"u\": 1}, {\"u\": 2}]\nGood luck!");
        assert_eq!(out, Extracted::Structured(json!([{"u": 1}, {"u": 2}])));
    }

    #[test]
    fn test_prose_around_object() {
        let (out, strategy) = StructuredExtractor::new()
            .extract_with_strategy(&json!("Result: {\"name\": \"Asha\"} done"));
        assert_eq!(out, Extracted::Structured(json!({"name": "Asha"})));
        assert_eq!(strategy, Strategy::ObjectSpan);
    }

    #[test]
    fn test_array_span_failure_falls_through_to_object() {
        // 第一个 [ 到最后一个 ] 不是合法数组，但对象跨度合法
        let out = extract("note [a] then {\"k\": [1]} end");
        assert_eq!(out, Extracted::Structured(json!({"k": [1]})));
    }

    #[test]
    fn test_scan_recovers_first_complete_value() {
        let out = extract("first {\"a\": 1} and later {\"b\": 2");
        assert_eq!(out, Extracted::Structured(json!({"a": 1})));
    }

    #[test]
    fn test_fence_with_other_language_tag() {
        let out = extract("```JSON\n{\"x\": true}\n```");
        assert_eq!(out, Extracted::Structured(json!({"x": true})));
    }

    #[test]
    fn test_never_panics_on_odd_input() {
        for input in ["", "   ", "]", "[", "}{", "][", "```", "{\"a\":", "[1, 2", "```json```"] {
            let out = extract(input);
            if let Extracted::Text(t) = out {
                assert_eq!(t, input);
            }
        }
    }

    #[test]
    fn test_bare_scalar_json_is_structured() {
        assert_eq!(extract("42"), Extracted::Structured(json!(42)));
    }

    #[test]
    fn test_reviews_canonical_key() {
        let raw = json!("{\"reviews\": [{\"u\": \"A\"}], \"data\": [1]}");
        let out = StructuredExtractor::new().extract_list(&raw, "reviews");
        assert_eq!(out, Extracted::Structured(json!([{"u": "A"}])));
    }

    #[test]
    fn test_reviews_first_array_field() {
        let raw = json!({"summary": "ok", "items": [{"u": "B"}], "other": [2]});
        let out = StructuredExtractor::new().extract_list(&raw, "reviews");
        assert_eq!(out, Extracted::Structured(json!([{"u": "B"}])));
    }

    #[test]
    fn test_reviews_object_without_arrays_unchanged() {
        let raw = json!({"summary": "ok"});
        let out = StructuredExtractor::new().extract_list(&raw, "reviews");
        assert_eq!(out, Extracted::Structured(raw));
    }

    #[test]
    fn test_parse_profile_lines() {
        let text = "**Student Name**: Asha\nBudget: 20 lakhs\nPreferred Locations: Canada, Germany\nCGPA: not specified\nno colon here";
        let profile = parse_profile_lines(text);
        assert_eq!(profile.get("student_name"), Some(&json!("Asha")));
        assert_eq!(profile.get("budget"), Some(&json!("20 lakhs")));
        assert_eq!(profile.get("preferred_locations"), Some(&json!(["Canada", "Germany"])));
        assert!(!profile.contains_key("cgpa"));
        assert_eq!(profile.len(), 3);
    }
}
