//! 消费边界：从存储里的原始输出生成展示用报告
//!
//! 存储只保存原始值，抽取在这里进行。抽取失败时退化为纯文本，报告照样可用。

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;

use crate::pipeline::{
    parse_profile_lines, Extracted, ResultStore, Stage, StageStatus, StoreSnapshot, StructuredExtractor,
};

/// 单个阶段在报告中的展示
#[derive(Debug, Clone, Serialize)]
pub struct ReportSection {
    pub stage: Stage,
    pub status: StageStatus,
    pub content: Option<Extracted>,
}

impl ReportSection {
    pub fn is_available(&self) -> bool {
        self.content.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub profile: ReportSection,
    pub matched_programs: ReportSection,
    pub ranked_programs: ReportSection,
    pub scholarships: ReportSection,
    pub reviews: ReportSection,
}

impl Report {
    pub fn from_store(store: &ResultStore) -> Self {
        Self::from_snapshot(&store.snapshot())
    }

    pub fn from_snapshot(store: &StoreSnapshot) -> Self {
        let raw = |stage: Stage| store.get(stage).raw_output.as_ref();
        let extractor = StructuredExtractor::new();
        let section = |stage: Stage, content: Option<Extracted>| ReportSection {
            stage,
            status: store.get(stage).status,
            content,
        };

        let profile = raw(Stage::Normalize).map(|raw| match extractor.extract(raw) {
            Extracted::Text(text) => {
                let fields = parse_profile_lines(&text);
                if fields.is_empty() {
                    Extracted::Text(text)
                } else {
                    Extracted::Structured(Value::Object(fields))
                }
            }
            structured => structured,
        });

        Self {
            profile: section(Stage::Normalize, profile),
            matched_programs: section(
                Stage::Match,
                raw(Stage::Match).map(|raw| extractor.extract(raw)),
            ),
            ranked_programs: section(
                Stage::Rank,
                raw(Stage::Rank).map(|raw| extractor.extract(raw)),
            ),
            scholarships: section(
                Stage::Scholarships,
                raw(Stage::Scholarships).map(|raw| extractor.extract(raw)),
            ),
            reviews: section(
                Stage::Reviews,
                raw(Stage::Reviews)
                    .map(|raw| extractor.extract_list(raw, Stage::Reviews.result_key())),
            ),
        }
    }

    pub fn sections(&self) -> [&ReportSection; 5] {
        [
            &self.profile,
            &self.matched_programs,
            &self.ranked_programs,
            &self.scholarships,
            &self.reviews,
        ]
    }

    /// 终端展示用的纯文本
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in self.sections() {
            let _ = writeln!(out, "== {} [{:?}] ==", section.stage.label(), section.status);
            match &section.content {
                None => out.push_str("(no result)\n"),
                Some(Extracted::Text(text)) => {
                    out.push_str(text.trim());
                    out.push('\n');
                }
                Some(Extracted::Structured(Value::Array(items))) => {
                    for (i, item) in items.iter().enumerate() {
                        let _ = writeln!(out, "{}. {}", i + 1, headline(item));
                    }
                }
                Some(Extracted::Structured(Value::Object(map))) => {
                    for (k, v) in map {
                        let _ = writeln!(out, "{}: {}", k, inline(v));
                    }
                }
                Some(Extracted::Structured(other)) => {
                    let _ = writeln!(out, "{}", inline(other));
                }
            }
            out.push('\n');
        }
        out
    }
}

/// 列表项的标题：优先 university / program / name
fn headline(item: &Value) -> String {
    let Value::Object(map) = item else {
        return inline(item);
    };
    let parts: Vec<String> = ["university", "program", "name", "sentiment"]
        .iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        inline(item)
    } else {
        parts.join(" | ")
    }
}

fn inline(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(inline).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}
