//! 阶段输入的拼装
//!
//! 下游阶段的输入是「画像 + 之前所有阶段的原始输出」的累积，不是解析后的结构，
//! 这样原始文本能原样传给下一个 Agent。反馈文本只进入 payload，不改画像。

use serde_json::{Map, Value};

use crate::pipeline::{ResultStore, Stage, StageStatus};
use crate::profile::StudentProfile;

pub const USER_FEEDBACK_KEY: &str = "user_feedback";

/// `stage` 的输入：画像 + 其之前所有成功阶段的原始输出 + 可选反馈
pub fn stage_payload(
    profile: &StudentProfile,
    store: &ResultStore,
    stage: Stage,
    feedback: Option<&str>,
) -> Value {
    let mut map: Map<String, Value> = profile.to_payload();

    for result in store.iter().take_while(|r| r.stage < stage) {
        if result.status != StageStatus::Succeeded {
            continue;
        }
        if let Some(raw) = result.raw_output.as_ref().filter(|v| !v.is_null()) {
            // stage 0 的输出覆盖画像里的 normalized_profile
            map.insert(result.stage.result_key().to_string(), raw.clone());
        }
    }

    if let Some(text) = feedback.map(str::trim).filter(|t| !t.is_empty()) {
        map.insert(USER_FEEDBACK_KEY.to_string(), Value::String(text.to_string()));
    }

    tracing::debug!("{} payload keys: {:?}", stage, map.keys().collect::<Vec<_>>());
    Value::Object(map)
}

/// 用本次运行刚拿到的输出替换 payload 中的某个阶段结果
pub fn with_result(mut payload: Value, stage: Stage, raw: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.insert(stage.result_key().to_string(), raw);
    }
    payload
}
