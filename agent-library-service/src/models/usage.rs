use crate::keys::{AGENT_FIELD_PREFIX, API_CALLS_FIELD, LAST_USED_FIELD};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Read view of one user's usage counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserUsage {
    pub api_calls: i64,
    pub agents: BTreeMap<String, i64>,
    pub last_used: Option<String>,
}

impl UserUsage {
    /// Build the view from the raw `user:<id>:usage` hash. Fields that are
    /// not integers where integers are expected count as zero.
    pub fn from_counters(fields: &HashMap<String, String>) -> Self {
        let mut usage = UserUsage::default();
        for (field, value) in fields {
            if field == API_CALLS_FIELD {
                usage.api_calls = value.parse().unwrap_or(0);
            } else if field == LAST_USED_FIELD {
                usage.last_used = Some(value.clone());
            } else if let Some(agent_id) = field.strip_prefix(AGENT_FIELD_PREFIX) {
                usage
                    .agents
                    .insert(agent_id.to_string(), value.parse().unwrap_or(0));
            }
        }
        usage
    }
}

/// Counter values right after one usage event was recorded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecordedUsage {
    pub total_calls: i64,
    pub user_calls: i64,
    pub agent_calls: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_hash_maps_onto_view() {
        let fields: HashMap<String, String> = [
            ("apiCalls", "3"),
            ("agent:retrieval-qa", "2"),
            ("agent:summarization", "1"),
            ("lastUsed", "2024-05-01T10:00:00.000Z"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let usage = UserUsage::from_counters(&fields);
        assert_eq!(usage.api_calls, 3);
        assert_eq!(usage.agents.get("retrieval-qa"), Some(&2));
        assert_eq!(usage.agents.get("summarization"), Some(&1));
        assert_eq!(usage.last_used.as_deref(), Some("2024-05-01T10:00:00.000Z"));
    }

    #[test]
    fn empty_hash_is_the_default_view() {
        let usage = UserUsage::from_counters(&HashMap::new());
        assert_eq!(
            serde_json::to_value(&usage).unwrap(),
            serde_json::json!({"apiCalls": 0, "agents": {}, "lastUsed": null})
        );
    }
}
