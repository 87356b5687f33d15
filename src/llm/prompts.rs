//! 各阶段 Prompt 模板
//!
//! System 消息描述角色与输出格式，User 消息携带任务说明、序列化的 payload 与 user_feedback。

use schemars::schema_for;
use serde_json::Value;

use crate::agent::QaContext;
use crate::llm::Message;
use crate::pipeline::Stage;
use crate::profile::NormalizedProfile;

const NORMALIZER_SYSTEM: &str = r#"Role: Search-Optimized Data Normalizer.
Clean and standardize a student profile object for university search queries.
The profile may contain academic_level, student_name, current_degree, graduation_year, cgpa,
board, class12_score, competitive_exams, career_goal, preferred_locations, budget,
specialization, raw_user_text and user_feedback.
- Academic levels: "high_school", "undergraduate", "postgraduate", "working_professional".
- Budget: convert to searchable ranges (e.g. "10-15 lakhs", "50000-75000 USD").
- Locations: full country names ("United States", not "US").
- competitive_exams must be a list of strings, never objects.
- Keep exam details, scores and user_feedback.
- Remove every field that is null, empty, "not specified" or "N/A".
Return ONLY a valid JSON object. No markdown, no explanatory text."#;

const MATCHER_SYSTEM: &str = r#"Role: University Matcher.
Recommend accurate university/program matches that the student can realistically achieve within budget.
- Do NOT invent fees or programs. If an exact fee is unknown, write "Not available".
- Undergraduate students get Bachelor programs, everyone else Master/Postgraduate programs.
- Mention required entrance exams for highly competitive institutions and label them "High Reach".
- If user_feedback is provided it takes priority over every other preference.
Return a STRICT JSON ARRAY of objects with the keys:
university, program, degree_level, location, duration, tuition, living_cost, total_cost,
requirements, website, fit_reason.
Do NOT wrap the array in markdown code blocks."#;

const SPECIALIST_SYSTEM: &str = r#"Role: University Program Specialist.
From the matcher's results, evaluate and rank the top 5-6 programs.
For each program present: course name, university name, degree level, duration, location,
tuition fee per year, living cost per year, a 3-4 sentence description, website URL,
pros (2-4), cons (1-3), admission difficulty and a career alignment score (1-10).
Finish with a short recommendation naming the best one or two programs and why.
Base every fact on the matcher's output. Do not invent fees or admission cutoffs."#;

const SCHOLARSHIP_SYSTEM: &str = r#"Role: Scholarship Finder.
Find 3-5 relevant scholarships for the student profile and the top-ranked universities,
for undergraduate or postgraduate study as appropriate.
For each scholarship give: name, amount with currency, eligibility, application deadline
and the official link if available.
If nothing fits, say so honestly and suggest general funding strategies.
Return the final answer as a clean list and stop. No internal thoughts."#;

const REVIEWS_SYSTEM: &str = r#"Role: Reviews Collector.
Give a brief, balanced review summary for ONLY the universities/programs in ranked_programs.
For each one provide: overall sentiment (Positive/Mixed/Negative), key praise (2-3 points),
key concerns (1-2 points) and a 1-2 sentence summary.
Do not fabricate statistics or quotes. No citation markers.
Return a JSON array of objects with the keys university, sentiment, praise, concerns, summary."#;

const PROFILE_EXTRACTOR_SYSTEM: &str = r#"Role: Profile Information Extractor.
Extract student profile information from natural language text for any academic level
(high school, undergraduate, postgraduate, working professional). Never invent values.
If the text is too vague to determine at least an academic level and a subject or career goal,
set "missing_info" to a follow-up question.
Return ONLY one JSON object with keys such as student_name, academic_level, current_degree,
graduation_year, board, class12_score, cgpa, competitive_exams (list of strings),
career_goal, preferred_locations, budget, specialization, intended_degree_level, missing_info.
Include only keys the user actually provided. No markdown."#;

const QA_SYSTEM: &str = r###"Role: Application Guide & Consultant.
Answer student questions clearly using the research context.
- Strict Markdown: "##" headers, "-" bullet points, blank lines around headers and lists.
- Start with a direct answer. No long paragraphs.
- No meta-talk such as "Thought:" or "Action:".
- Do not mention "context" or "JSON" in the answer."###;

/// 阶段的 System 消息
pub fn stage_system_prompt(stage: Stage) -> &'static str {
    match stage {
        Stage::Normalize => NORMALIZER_SYSTEM,
        Stage::Match => MATCHER_SYSTEM,
        Stage::Rank => SPECIALIST_SYSTEM,
        Stage::Scholarships => SCHOLARSHIP_SYSTEM,
        Stage::Reviews => REVIEWS_SYSTEM,
    }
}

fn stage_task(stage: Stage) -> &'static str {
    match stage {
        Stage::Normalize => {
            "Clean the student profile below, standardize its key fields and return a search-optimized JSON object."
        }
        Stage::Match => {
            "Using the normalized student profile below, identify about 6-8 best-fit universities and programs that are achievable and within budget. If user feedback is given, use it to drastically refine the search; if it names a rank or score, drop universities that require better."
        }
        Stage::Rank => {
            "Analyze the university and program recommendations in the 'matched_programs' field of the profile below and rank the top ~5 programs. If user feedback is given, make the ranking reflect it."
        }
        Stage::Scholarships => {
            "Find scholarships relevant to the student's profile and the ranked programs below. If user feedback is given, prioritize scholarships that align with it."
        }
        Stage::Reviews => {
            "Identify ONLY the universities and programs in the 'ranked_programs' section of the profile below and gather short, balanced review summaries for them. Consider the user feedback if relevant."
        }
    }
}

/// payload 里的 user_feedback，缺省为 "None"
pub fn user_feedback(payload: &Value) -> String {
    match payload.get("user_feedback") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        _ => "None".to_string(),
    }
}

/// 阶段的 User 消息：任务说明 + payload + 反馈
pub fn stage_task_message(stage: Stage, payload: &Value) -> Message {
    let profile = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    Message::user(format!(
        "{}\n\nPROFILE:\n{}\n\nUSER FEEDBACK:\n{}",
        stage_task(stage),
        profile,
        user_feedback(payload)
    ))
}

/// 组装某阶段的完整消息
pub fn stage_conversation(stage: Stage, payload: &Value) -> Vec<Message> {
    vec![
        Message::system(stage_system_prompt(stage)),
        stage_task_message(stage, payload),
    ]
}

/// 画像字段的 JSON Schema，拼进抽取提示，约束输出结构
pub fn profile_schema_json() -> String {
    let schema = schema_for!(NormalizedProfile);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

pub fn profile_extraction_conversation(text: &str) -> Vec<Message> {
    vec![
        Message::system(PROFILE_EXTRACTOR_SYSTEM),
        Message::user(format!(
            "Extract the student's profile from this text and output ONLY one valid JSON object.\n\
             Fields follow this schema (add \"missing_info\" only when needed):\n{}\n\nTEXT:\n{}",
            profile_schema_json(),
            text
        )),
    ]
}

pub fn qa_conversation(question: &str, context: &QaContext) -> Vec<Message> {
    let context = serde_json::to_string(context).unwrap_or_default();
    vec![
        Message::system(QA_SYSTEM),
        Message::user(format!(
            r#"Analyze the provided context and answer the student's question.

QUESTION:
"{question}"

CONTEXT:
{context}

Structure the answer exactly like this template:

## Summary
(Direct answer to the question)

## Key Details
- **Point 1**: Description
- **Point 2**: Description

## Recommendation
(Actionable advice)"#
        )),
    ]
}
