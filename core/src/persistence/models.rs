//! Persisted domain entities (SPEC_FULL.md §3, §4.3, §6).

use serde::{Deserialize, Serialize};

/// Maximum length of a workspace name (SPEC_FULL.md §3, §8: 50 accepted,
/// 51 rejected).
pub const WORKSPACE_NAME_MAX_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub hidden: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Todo {
    pub id: String,
    pub workspace_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Validate a workspace name against the 50-char limit. `required`
/// (non-empty) is always true per the data model.
pub fn validate_workspace_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("workspace name is required".to_string());
    }
    if name.chars().count() > WORKSPACE_NAME_MAX_LEN {
        return Err(format!(
            "workspace name must be at most {WORKSPACE_NAME_MAX_LEN} characters"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_at_max_len_accepted() {
        let name = "a".repeat(WORKSPACE_NAME_MAX_LEN);
        assert!(validate_workspace_name(&name).is_ok());
    }

    #[test]
    fn name_over_max_len_rejected() {
        let name = "a".repeat(WORKSPACE_NAME_MAX_LEN + 1);
        assert!(validate_workspace_name(&name).is_err());
    }

    #[test]
    fn empty_name_rejected() {
        assert!(validate_workspace_name("").is_err());
    }

    #[test]
    fn backlog_item_type_field_renamed() {
        let item = BacklogItem {
            id: "b1".into(),
            item_type: "bug".into(),
            title: "fix it".into(),
            description: None,
            priority: "high".into(),
            status: "open".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"type\":\"bug\""));
        assert!(!json.contains("itemType"));
    }
}
