//! Decision Engine (C8): turns a proactive LLM reply into a validated,
//! gated `Decision`. Parsing reuses the same balanced-brace JSON extractor
//! the classifier (C3) relies on.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::json_extract::extract_first_json_object;
use warden_types::WardenError;

pub const CERTAINTY_AUTONOMOUS_THRESHOLD: f64 = 0.8;
pub const SIGNIFICANCE_NOTIFY_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    DevelopSkill,
    WorkOnTask,
    Communicate,
    Meditate,
    AskMaster,
    ProactiveOutreach,
}

impl Action {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "develop_skill" => Some(Action::DevelopSkill),
            "work_on_task" => Some(Action::WorkOnTask),
            "communicate" => Some(Action::Communicate),
            "meditate" => Some(Action::Meditate),
            "ask_master" => Some(Action::AskMaster),
            "proactive_outreach" => Some(Action::ProactiveOutreach),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::DevelopSkill => "develop_skill",
            Action::WorkOnTask => "work_on_task",
            Action::Communicate => "communicate",
            Action::Meditate => "meditate",
            Action::AskMaster => "ask_master",
            Action::ProactiveOutreach => "proactive_outreach",
        }
    }

    /// Required `details` keys per §4.8's action-specific schema.
    fn required_detail_keys(self) -> &'static [&'static str] {
        match self {
            Action::DevelopSkill => &["skill_name", "approach"],
            Action::WorkOnTask => &["task_id", "approach"],
            Action::Communicate => &["recipient", "message", "priority"],
            Action::Meditate => &["duration"],
            Action::AskMaster => &["question"],
            Action::ProactiveOutreach => &["chat_id", "message", "purpose"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionType {
    Internal,
    External,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub certainty: f64,
    pub significance: f64,
    pub decision_type: DecisionType,
    pub details: Value,
}

impl Decision {
    pub fn is_autonomous(&self) -> bool {
        self.certainty >= CERTAINTY_AUTONOMOUS_THRESHOLD
    }

    pub fn is_notable(&self) -> bool {
        self.significance >= SIGNIFICANCE_NOTIFY_THRESHOLD
    }
}

/// Extracts and validates the first balanced JSON object in `text` against
/// the closed decision schema. Any structural problem (unknown action,
/// missing required detail key, out-of-range score) is a parse failure —
/// the caller logs and skips the cycle rather than guessing.
pub fn parse_decision(text: &str) -> Result<Decision, WardenError> {
    let value = extract_first_json_object(text)
        .ok_or_else(|| WardenError::BusinessInvariantViolated("proactive reply contained no JSON object".into()))?;

    let action_str = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| WardenError::BusinessInvariantViolated("decision missing `action`".into()))?;
    let action = Action::from_str(action_str)
        .ok_or_else(|| WardenError::BusinessInvariantViolated(format!("decision has unknown action `{action_str}`")))?;

    let certainty = value
        .get("certainty")
        .and_then(Value::as_f64)
        .ok_or_else(|| WardenError::BusinessInvariantViolated("decision missing `certainty`".into()))?;
    let significance = value
        .get("significance")
        .and_then(Value::as_f64)
        .ok_or_else(|| WardenError::BusinessInvariantViolated("decision missing `significance`".into()))?;
    if !(0.0..=1.0).contains(&certainty) || !(0.0..=1.0).contains(&significance) {
        return Err(WardenError::BusinessInvariantViolated("certainty/significance must be in [0,1]".into()));
    }

    let type_str = value.get("type").and_then(Value::as_str).unwrap_or("internal");
    let decision_type = match type_str {
        "internal" => DecisionType::Internal,
        "external" => DecisionType::External,
        other => return Err(WardenError::BusinessInvariantViolated(format!("unknown decision type `{other}`"))),
    };

    let details = value.get("details").cloned().unwrap_or(Value::Null);
    let details_obj = details
        .as_object()
        .ok_or_else(|| WardenError::BusinessInvariantViolated("decision `details` must be an object".into()))?;
    for key in action.required_detail_keys() {
        if !details_obj.contains_key(*key) {
            return Err(WardenError::BusinessInvariantViolated(format!(
                "action `{}` is missing required detail `{key}`",
                action.as_str()
            )));
        }
    }

    Ok(Decision { action, certainty, significance, decision_type, details })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_meditate_decision() {
        let text = r#"Here's my plan: {"action": "meditate", "certainty": 0.9, "significance": 0.1, "type": "internal", "details": {"duration": 60}}"#;
        let decision = parse_decision(text).unwrap();
        assert_eq!(decision.action, Action::Meditate);
        assert!(decision.is_autonomous());
        assert!(!decision.is_notable());
    }

    #[test]
    fn rejects_unknown_action() {
        let text = r#"{"action": "do_anything", "certainty": 0.9, "significance": 0.1, "details": {}}"#;
        assert!(parse_decision(text).is_err());
    }

    #[test]
    fn rejects_missing_required_detail_key() {
        let text = r#"{"action": "ask_master", "certainty": 0.5, "significance": 0.5, "details": {"context": "x"}}"#;
        assert!(parse_decision(text).is_err());
    }

    #[test]
    fn rejects_out_of_range_scores() {
        let text = r#"{"action": "meditate", "certainty": 1.5, "significance": 0.1, "details": {"duration": 10}}"#;
        assert!(parse_decision(text).is_err());
    }

    #[test]
    fn low_certainty_is_not_autonomous() {
        let text = r#"{"action": "communicate", "certainty": 0.4, "significance": 0.9, "details": {"recipient": "master", "message": "hi", "priority": "low"}}"#;
        let decision = parse_decision(text).unwrap();
        assert!(!decision.is_autonomous());
        assert!(decision.is_notable());
    }
}
