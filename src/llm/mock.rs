//! Mock LLM 客户端（用于离线运行与测试，无需 API）
//!
//! 按 System 消息里的角色返回固定输出，覆盖抽取器的各条路径：
//! 围栏 JSON 数组、带前言的数组、纯文本列表、对象包装的列表。

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

const NORMALIZED: &str = r#"{"academic_level": "undergraduate", "career_goal": "Machine learning engineer", "budget": "20-25 lakhs", "preferred_locations": ["Germany", "Canada"], "specialization": "Machine Learning"}"#;

const MATCHES: &str = "```json\n[\n  {\"university\": \"Technical University of Munich\", \"program\": \"MSc Informatics\", \"location\": \"Munich, Germany\", \"tuition\": \"Not available\", \"fit_reason\": \"Low tuition, strong ML research\"},\n  {\"university\": \"University of Toronto\", \"program\": \"MScAC\", \"location\": \"Toronto, Canada\", \"tuition\": \"Not available\", \"fit_reason\": \"Industry-focused ML track\"}\n]\n```";

const RANKED: &str = "Here are the ranked programs:\n[{\"rank\": 1, \"university\": \"Technical University of Munich\", \"program\": \"MSc Informatics\", \"career_alignment_score\": 9}, {\"rank\": 2, \"university\": \"University of Toronto\", \"program\": \"MScAC\", \"career_alignment_score\": 8}]\nTUM is the best fit for the budget.";

const SCHOLARSHIPS: &str = "- DAAD Study Scholarship: EUR 934/month, postgraduate, deadline October\n- Vector Scholarship in AI: CAD 17,500, Ontario AI master's programs, deadline December";

const REVIEWS: &str = r#"{"data": [{"university": "Technical University of Munich", "sentiment": "Positive", "summary": "Rigorous and well connected to industry."}, {"university": "University of Toronto", "sentiment": "Mixed", "summary": "Excellent faculty, expensive city."}]}"#;

const PROFILE: &str = r#"{"career_goal": "Machine learning engineer", "specialization": "Machine Learning"}"#;

const ANSWER: &str = "## Summary\n\nTUM is the most affordable option.\n\n## Key Details\n\n- **Tuition**: Not available\n\n## Recommendation\n\nApply to TUM first.";

/// Mock 客户端：按角色返回固定输出
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let role = system.lines().next().unwrap_or("");
        let output = match role {
            r if r.contains("Data Normalizer") => NORMALIZED,
            r if r.contains("University Matcher") => MATCHES,
            r if r.contains("Program Specialist") => RANKED,
            r if r.contains("Scholarship Finder") => SCHOLARSHIPS,
            r if r.contains("Reviews Collector") => REVIEWS,
            r if r.contains("Profile Information Extractor") => PROFILE,
            r if r.contains("Application Guide") => ANSWER,
            _ => return Err(LlmError::new(None, "Mock client has no response for this role")),
        };
        Ok(output.to_string())
    }
}
