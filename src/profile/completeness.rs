//! 画像完整性检查（软校验）
//!
//! 按学业阶段列出仍缺失的字段及追问语句；只用于提示，不阻塞流水线。

use super::NormalizedProfile;

/// 缺失字段及对应的追问
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    pub field: &'static str,
    pub question: &'static str,
}

const DEFAULT_REQUIRED: &[(&str, &str)] = &[
    ("student_name", "What's your full name?"),
    ("current_degree", "What degree are you currently pursuing?"),
    ("graduation_year", "When do you expect to graduate?"),
    ("cgpa", "What's your current CGPA or GPA?"),
    ("career_goal", "What's your main career goal?"),
    ("preferred_locations", "Which countries are you interested in studying?"),
    ("budget", "What is your approximate budget for the program?"),
    ("specialization", "What specialization or field would you like to focus on?"),
];

const HIGH_SCHOOL_REQUIRED: &[(&str, &str)] = &[
    ("student_name", "What's your full name?"),
    ("board", "Which board did you study under (e.g., CBSE, ICSE, State Board)?"),
    ("class12_score", "What was your Class 12 / higher secondary score?"),
    (
        "competitive_exams",
        "Have you written any competitive exams like JEE, NEET, SAT etc.? If yes, share exam name and score/rank.",
    ),
    ("preferred_locations", "Which countries are you interested in studying?"),
    ("budget", "What is your approximate budget for your undergraduate studies?"),
    (
        "specialization",
        "What field or branch (e.g., CS, Mechanical, MBBS, BBA) are you interested in?",
    ),
];

fn is_present(profile: &NormalizedProfile, field: &str) -> bool {
    let text = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    match field {
        "student_name" => text(&profile.student_name),
        "current_degree" => text(&profile.current_degree),
        "graduation_year" => text(&profile.graduation_year),
        "cgpa" => text(&profile.cgpa),
        "career_goal" => text(&profile.career_goal),
        "budget" => text(&profile.budget),
        "specialization" => text(&profile.specialization),
        "board" => text(&profile.board),
        "class12_score" => text(&profile.class12_score),
        "preferred_locations" => !profile.preferred_locations.is_empty(),
        "competitive_exams" => !profile.competitive_exams.is_empty(),
        _ => true,
    }
}

/// 返回缺失字段（高中生与其他阶段的必填集合不同）
pub fn missing_fields(profile: &NormalizedProfile) -> Vec<MissingField> {
    let required = if profile.academic_level == "high_school" {
        HIGH_SCHOOL_REQUIRED
    } else {
        DEFAULT_REQUIRED
    };
    required
        .iter()
        .filter(|(field, _)| !is_present(profile, field))
        .map(|&(field, question)| MissingField { field, question })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_misses_everything() {
        let missing = missing_fields(&NormalizedProfile::default());
        assert_eq!(missing.len(), DEFAULT_REQUIRED.len());
    }

    #[test]
    fn test_high_school_uses_its_own_set() {
        let profile = NormalizedProfile {
            academic_level: "high_school".into(),
            board: Some("CBSE".into()),
            budget: Some("20 lakhs".into()),
            ..NormalizedProfile::default()
        };
        let fields: Vec<_> = missing_fields(&profile).into_iter().map(|m| m.field).collect();
        assert!(fields.contains(&"class12_score"));
        assert!(!fields.contains(&"board"));
        assert!(!fields.contains(&"cgpa"));
    }
}
