//! 学生画像
//!
//! StudentProfile = 原始自由文本 + 规范化字段（NormalizedProfile）。
//! 画像只在抽取完成后创建一次；之后只能整体替换规范化部分，不做字段级修改。

pub mod completeness;
pub mod heuristics;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::core::PipelineError;

pub use completeness::{missing_fields, MissingField};
pub use heuristics::extract_info_from_text;

/// 抽取器用来表示「信息不足，需要追问」的字段
pub const MISSING_INFO_KEY: &str = "missing_info";

fn default_academic_level() -> String {
    "undergraduate".to_string()
}

/// 规范化后的画像字段；分数、年份等保持自由文本，不做数值化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedProfile {
    /// high_school / undergraduate / postgraduate / working_professional
    #[serde(default = "default_academic_level", deserialize_with = "lenient_level")]
    pub academic_level: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub current_degree: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub graduation_year: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub board: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub class12_score: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cgpa: Option<String>,
    /// 字符串（"JEE: AIR 1500"）或对象（{exam_name, details}）均可
    #[serde(default, deserialize_with = "lenient_list")]
    #[schemars(with = "Vec<String>")]
    pub competitive_exams: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub career_goal: Option<String>,
    #[serde(default, deserialize_with = "lenient_locations")]
    pub preferred_locations: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub budget: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub specialization: Option<String>,
}

impl Default for NormalizedProfile {
    fn default() -> Self {
        Self {
            academic_level: default_academic_level(),
            student_name: None,
            current_degree: None,
            graduation_year: None,
            board: None,
            class12_score: None,
            cgpa: None,
            competitive_exams: Vec::new(),
            career_goal: None,
            preferred_locations: Vec::new(),
            budget: None,
            specialization: None,
        }
    }
}

impl NormalizedProfile {
    /// 从抽取结果构建；null / "" / [] / {} 视为缺失，走默认值
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self, PipelineError> {
        let cleaned: Map<String, Value> = fields
            .iter()
            .filter(|(k, v)| k.as_str() != MISSING_INFO_KEY && !is_empty_value(v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(serde_json::from_value(Value::Object(cleaned))?)
    }
}

/// 学生画像：原始文本 + 规范化字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub raw_user_text: String,
    pub normalized_profile: Option<NormalizedProfile>,
}

impl StudentProfile {
    pub fn new(raw_user_text: impl Into<String>) -> Self {
        Self {
            raw_user_text: raw_user_text.into(),
            normalized_profile: None,
        }
    }

    /// 由画像抽取结果定稿：含 missing_info 时拒绝（调用方应重新提示用户）
    pub fn finalize(
        raw_user_text: impl Into<String>,
        extracted: &Map<String, Value>,
    ) -> Result<Self, PipelineError> {
        if let Some(question) = missing_info(extracted) {
            return Err(PipelineError::ProfileExtractionIncomplete(question));
        }
        let normalized = NormalizedProfile::from_fields(extracted)?;
        Ok(Self {
            raw_user_text: raw_user_text.into(),
            normalized_profile: Some(normalized),
        })
    }

    /// 整体替换规范化部分
    pub fn replace_normalized(&mut self, normalized: NormalizedProfile) {
        self.normalized_profile = Some(normalized);
    }

    pub fn is_finalized(&self) -> bool {
        self.normalized_profile.is_some()
    }

    /// 作为 Agent 输入的画像部分
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("raw_user_text".into(), Value::String(self.raw_user_text.clone()));
        map.insert(
            "normalized_profile".into(),
            serde_json::to_value(&self.normalized_profile).unwrap_or(Value::Null),
        );
        map
    }
}

/// 抽取结果中的追问（非空字符串才算）
pub fn missing_info(extracted: &Map<String, Value>) -> Option<String> {
    match extracted.get(MISSING_INFO_KEY) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// 合并抽取结果：overlay 中非空的值覆盖 base
pub fn merge_fields(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (k, v) in overlay {
        if !is_empty_value(&v) {
            base.insert(k, v);
        }
    }
}

pub(crate) fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn value_to_text(v: Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(d)?.and_then(value_to_text))
}

fn lenient_level<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(d)?.unwrap_or_else(default_academic_level))
}

fn lenient_list<'de, D>(d: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items,
        Some(other) => vec![other],
    })
}

/// 地点可以是数组，也可以是 "Canada, Germany and UK" 这样的字符串
fn lenient_locations<'de, D>(d: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(d)? {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.into_iter().filter_map(value_to_text).collect(),
        Some(Value::String(s)) => split_locations(&s),
        Some(other) => vec![other.to_string()],
    })
}

fn split_locations(s: &str) -> Vec<String> {
    s.split(',')
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_finalize_applies_defaults() {
        let profile = StudentProfile::finalize("text", &fields(json!({"budget": "20 lakhs"}))).unwrap();
        let n = profile.normalized_profile.unwrap();
        assert_eq!(n.academic_level, "undergraduate");
        assert_eq!(n.budget.as_deref(), Some("20 lakhs"));
        assert!(n.competitive_exams.is_empty());
        assert!(n.preferred_locations.is_empty());
    }

    #[test]
    fn test_finalize_rejects_missing_info() {
        let err = StudentProfile::finalize("text", &fields(json!({"missing_info": "no budget given"})))
            .unwrap_err();
        match err {
            PipelineError::ProfileExtractionIncomplete(q) => assert_eq!(q, "no budget given"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_blank_missing_info_is_ignored() {
        let profile = StudentProfile::finalize("t", &fields(json!({"missing_info": "  "}))).unwrap();
        assert!(profile.is_finalized());
    }

    #[test]
    fn test_lenient_field_types() {
        let n = NormalizedProfile::from_fields(&fields(json!({
            "graduation_year": 2025,
            "cgpa": 8.4,
            "academic_level": null,
            "preferred_locations": "Canada, Germany and UK",
            "competitive_exams": "JEE: AIR 1500",
            "intended_degree_level": "Master"
        })))
        .unwrap();
        assert_eq!(n.graduation_year.as_deref(), Some("2025"));
        assert_eq!(n.cgpa.as_deref(), Some("8.4"));
        assert_eq!(n.academic_level, "undergraduate");
        assert_eq!(n.preferred_locations, vec!["Canada", "Germany", "UK"]);
        assert_eq!(n.competitive_exams, vec![json!("JEE: AIR 1500")]);
    }

    #[test]
    fn test_merge_skips_empty_values() {
        let mut base = fields(json!({"budget": "20 lakhs", "cgpa": "8"}));
        merge_fields(&mut base, fields(json!({"budget": "", "cgpa": "9", "board": null, "exams": []})));
        assert_eq!(base.get("budget"), Some(&json!("20 lakhs")));
        assert_eq!(base.get("cgpa"), Some(&json!("9")));
        assert!(!base.contains_key("board"));
        assert!(!base.contains_key("exams"));
    }

    #[test]
    fn test_replace_normalized_is_whole() {
        let mut profile = StudentProfile::finalize("t", &fields(json!({"budget": "1 lakh"}))).unwrap();
        profile.replace_normalized(NormalizedProfile::default());
        assert_eq!(profile.normalized_profile.unwrap().budget, None);
    }
}
