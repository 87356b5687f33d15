//! 画像启发式抽取（不依赖 LLM）
//!
//! 用正则和关键词从自由文本里尽力抓取字段；抓不到的字段直接省略。
//! LLM 抽取结果随后覆盖在这里的结果之上。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Map, Value};

struct Patterns {
    name: Regex,
    degree: Regex,
    year: Regex,
    any_year: Regex,
    cgpa: Regex,
    goal: Regex,
    budget: Regex,
    country: Regex,
    specialization: Regex,
    class12_percent: Regex,
    class12_marks: Regex,
    class12_line: Regex,
    percent: Regex,
    exam: Regex,
}

fn patterns() -> &'static Patterns {
    static P: OnceLock<Patterns> = OnceLock::new();
    P.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("static regex");
        Patterns {
            name: re(r"\b(?i:my name is)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*)"),
            degree: re(
                r"(?i)\b(b\.tech|btech|engineering|bachelors?|bsc|b\.e\.?|ba|bcom|bca|computer science|information technology|mechanical|civil)\b",
            ),
            year: re(r"(?i)(?:graduat|finish|complet|passed out|year)\w*\s*(?:in|year)?\s*(\d{4}|\d{2})\b"),
            any_year: re(r"\b((?:19|20)\d{2})\b"),
            cgpa: re(r"(?i)cgpa\s*(?:is|:|of)?\s*(\d+(?:\.\d+)?(?:\s*/\s*\d+(?:\.\d+)?)?)"),
            goal: re(
                r"(?i)(?:goal|want|aspire|aim|plan)\s*(?:to\s+)?(?:become|be|pursue)?\s*(?:a\s+|an\s+)?(\w+(?:\s+\w+)*?\s*(?:engineer|scientist|developer|researcher|specialist|expert|manager|analyst))",
            ),
            budget: re(r"(?i)(\d{1,3}\s*lakhs?)"),
            country: re(
                r"\b(USA|US|UK|(?i:canada|germany|united kingdom|australia|france|singapore|netherlands|ireland|india))\b",
            ),
            specialization: re(
                r"(?i)(?:specialization|speciali[sz]e?|field|major|focus)\s*(?:in\s+)?(machine learning|ml|ai|computer science|cs|data science|data analytics|software engineering|mechanical engineering|civil engineering|electronics|ece)\b",
            ),
            class12_percent: re(
                r"(?i)(?:12th|class 12|class xii|higher secondary|hsc)[^.\n%]*?(\d{2,3}(?:\.\d+)?)\s*%",
            ),
            class12_marks: re(r"(?i)(?:12th|class 12|class xii|higher secondary|hsc)[^.\n]*?(\d{2,4}/\d{2,4})"),
            class12_line: re(r"(?i).*(?:12th|class 12|class xii|higher secondary|hsc).*"),
            percent: re(r"(\d{2,3}(?:\.\d+)?)\s*%"),
            exam: re(
                r"\b(JEE(?:\s*(?i:main|advanced))?|NEET|SAT|ACT|BITSAT|VITEEE|COMEDK|MHT[-\s]?CET|KCET|CUET)\b[^.\n]*",
            ),
        }
    })
}

/// 从自由文本中启发式抽取画像字段
pub fn extract_info_from_text(text: &str) -> Map<String, Value> {
    let p = patterns();
    let mut info = Map::new();
    let mut put = |key: &str, value: Value| {
        info.insert(key.to_string(), value);
    };

    if let Some(c) = p.name.captures(text) {
        put("student_name", json!(c[1].trim()));
    }
    if let Some(c) = p.degree.captures(text) {
        put("current_degree", json!(c[1].trim()));
    }
    if let Some(year) = extract_year(text) {
        put("graduation_year", json!(year));
    }
    if let Some(c) = p.cgpa.captures(text) {
        put("cgpa", json!(c[1].trim()));
    }
    if let Some(c) = p.goal.captures(text) {
        put("career_goal", json!(c[1].trim()));
    }
    if let Some(c) = p.budget.captures(text) {
        put("budget", json!(c[1].trim()));
    }
    let locations = extract_locations(text);
    if !locations.is_empty() {
        put("preferred_locations", json!(locations));
    }
    if let Some(c) = p.specialization.captures(text) {
        put("specialization", json!(canonical_specialization(c[1].trim())));
    }
    if let Some(level) = infer_academic_level(text) {
        put("academic_level", json!(level));
    }
    if let Some(board) = extract_board(text) {
        put("board", json!(board));
    }
    if let Some(score) = extract_class12_score(text) {
        put("class12_score", json!(score));
    }
    let exams = extract_competitive_exams(text);
    if !exams.is_empty() {
        put("competitive_exams", Value::Array(exams));
    }

    info
}

fn extract_year(text: &str) -> Option<String> {
    let p = patterns();
    let year = p
        .year
        .captures(text)
        .or_else(|| p.any_year.captures(text))
        .map(|c| c[1].trim().to_string())?;
    // 两位数年份按 20xx 处理
    Some(if year.len() == 2 { format!("20{year}") } else { year })
}

fn extract_locations(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for c in patterns().country.captures_iter(text) {
        let raw = c[1].trim();
        let name = match raw.to_uppercase().as_str() {
            "US" | "USA" => "USA".to_string(),
            "UK" | "UNITED KINGDOM" => "United Kingdom".to_string(),
            _ => title_case(raw),
        };
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn canonical_specialization(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "ml" | "machine learning" => "Machine Learning".to_string(),
        "ai" => "Artificial Intelligence".to_string(),
        "cs" | "computer science" => "Computer Science".to_string(),
        "ece" | "electronics" => "Electronics and Communication".to_string(),
        _ => raw.to_string(),
    }
}

const HIGH_SCHOOL_HINTS: &[&str] = &[
    "12th", "class 12", "class xii", "higher secondary", "plus two", "hsc", "intermediate", "puc",
    "pre-university",
];
const UNDERGRAD_HINTS: &[&str] = &[
    "b.tech", "btech", "b.e", "bachelor of", "bachelors in", "bsc", "b.sc", "bca", "bcom", "b.com",
    "ba ", "b.a ",
];
const POSTGRAD_HINTS: &[&str] = &[
    "m.tech", "mtech", "m.e", "master of", "ms in", "m.s.", "msc", "m.sc", "mba", "pgdm",
];
const PROFESSIONAL_HINTS: &[&str] = &[
    "working", "work experience", "software engineer", "developer at", "currently employed",
    "full-time job",
];

/// 推断学业阶段：high_school / undergraduate / postgraduate / working_professional
pub fn infer_academic_level(text: &str) -> Option<&'static str> {
    let t = text.to_lowercase();
    let any = |hints: &[&str]| hints.iter().any(|h| t.contains(h));

    // 已经提到本科学位的不算高中生
    if any(HIGH_SCHOOL_HINTS) && !(t.contains("b.tech") || t.contains("btech") || t.contains("bachelor")) {
        return Some("high_school");
    }
    if any(UNDERGRAD_HINTS) {
        return Some("undergraduate");
    }
    if any(POSTGRAD_HINTS) {
        return Some("postgraduate");
    }
    if any(PROFESSIONAL_HINTS) {
        return Some("working_professional");
    }
    None
}

fn extract_board(text: &str) -> Option<&'static str> {
    let t = text.to_lowercase();
    if t.contains("cbse") {
        Some("CBSE")
    } else if t.contains("icse") {
        Some("ICSE")
    } else if t.contains("state board") || t.contains("stateboard") {
        Some("State Board")
    } else if t.contains("hsc") || t.contains("higher secondary") {
        Some("HSC")
    } else if t.contains("puc") || t.contains("pre-university") {
        Some("PUC")
    } else {
        None
    }
}

fn extract_class12_score(text: &str) -> Option<String> {
    let p = patterns();
    for re in [&p.class12_percent, &p.class12_marks] {
        if let Some(c) = re.captures(text) {
            return Some(c[1].trim().to_string());
        }
    }
    // 同一行里出现 12th 与百分比
    p.class12_line.find_iter(text).find_map(|line| {
        p.percent
            .captures(line.as_str())
            .map(|c| format!("{}%", c[1].trim()))
    })
}

fn extract_competitive_exams(text: &str) -> Vec<Value> {
    patterns()
        .exam
        .captures_iter(text)
        .map(|c| {
            json!({
                "exam_name": c[1].trim().to_uppercase(),
                "details": c[0].trim(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "My name is Asha Rao. I'm a high school student interested in Computer Science. \
        I scored 92% in Class 12 with CBSE board. I want to pursue B.Tech and am interested in \
        universities in the US or Canada. My budget is around 20 lakhs. I've appeared for JEE Main and scored 1500 AIR.";

    #[test]
    fn test_extracts_core_fields() {
        let info = extract_info_from_text(SAMPLE);
        assert_eq!(info.get("student_name"), Some(&json!("Asha Rao")));
        assert_eq!(info.get("budget"), Some(&json!("20 lakhs")));
        assert_eq!(info.get("board"), Some(&json!("CBSE")));
        // 「92% in Class 12」百分比在关键词之前，走同行兜底
        assert_eq!(info.get("class12_score"), Some(&json!("92%")));
        assert_eq!(info.get("preferred_locations"), Some(&json!(["USA", "Canada"])));
    }

    #[test]
    fn test_bachelor_mention_is_not_high_school() {
        assert_eq!(infer_academic_level("class 12 done, now in btech"), Some("undergraduate"));
        assert_eq!(infer_academic_level("I finished class 12 last year"), Some("high_school"));
        assert_eq!(infer_academic_level("doing an mba"), Some("postgraduate"));
        assert_eq!(infer_academic_level("hello"), None);
    }

    #[test]
    fn test_exam_snippets() {
        let info = extract_info_from_text(SAMPLE);
        let exams = info.get("competitive_exams").and_then(Value::as_array).unwrap();
        assert_eq!(exams.len(), 1);
        assert_eq!(exams[0]["exam_name"], json!("JEE MAIN"));
        assert!(exams[0]["details"].as_str().unwrap().contains("1500 AIR"));
    }

    #[test]
    fn test_two_digit_year_expands() {
        let info = extract_info_from_text("I will graduate in 26 with cgpa 8.2/10");
        assert_eq!(info.get("graduation_year"), Some(&json!("2026")));
        assert_eq!(info.get("cgpa"), Some(&json!("8.2/10")));
    }

    #[test]
    fn test_specialization_and_goal() {
        let info = extract_info_from_text("I want to specialize in ml and my goal is to become a data scientist");
        assert_eq!(info.get("specialization"), Some(&json!("Machine Learning")));
        assert!(info
            .get("career_goal")
            .and_then(Value::as_str)
            .is_some_and(|g| g.ends_with("scientist")));
    }

    #[test]
    fn test_pronoun_us_is_not_a_country() {
        let info = extract_info_from_text("please help us find something in germany");
        assert_eq!(info.get("preferred_locations"), Some(&json!(["Germany"])));
    }
}
