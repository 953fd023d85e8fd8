//! Human-readable rendering of a canonical state snapshot for the debug
//! panel and the CLI harness.

use serde_json::Value;

const OPERATIONAL_KEYS: &[&str] = &[
    "episode_id",
    "timestamp_started",
    "timestamp_last_updated",
    "questions_answered",
    "questions_satisfied",
    "follow_up_blocks_activated",
    "follow_up_blocks_completed",
];

/// Compact multi-line summary of the consultation so far.
pub fn format_state_for_display(snapshot: &Value) -> String {
    let mut lines = Vec::new();

    let consultation_id = snapshot
        .get("consultation_id")
        .and_then(Value::as_str)
        .unwrap_or("?");
    let mode = snapshot
        .get("conversation_mode")
        .and_then(Value::as_str)
        .unwrap_or("?");
    let turn_count = snapshot.get("turn_count").and_then(Value::as_u64).unwrap_or(0);
    lines.push(format!("consultation {consultation_id} | turn {turn_count} | mode {mode}"));

    if let Some(episodes) = snapshot.get("episodes").and_then(Value::as_array) {
        for episode in episodes {
            let id = episode.get("episode_id").and_then(Value::as_u64).unwrap_or(0);
            let answered = episode
                .get("questions_answered")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let blocks = episode
                .get("follow_up_blocks_activated")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);

            let fields: Vec<String> = episode
                .as_object()
                .map(|map| {
                    map.iter()
                        .filter(|(key, _)| !OPERATIONAL_KEYS.contains(&key.as_str()))
                        .map(|(key, value)| format!("{key}={}", compact(value)))
                        .collect()
                })
                .unwrap_or_default();

            lines.push(format!(
                "  episode {id}: {answered} answered, {blocks} blocks, fields [{}]",
                fields.join(", ")
            ));
        }
    }

    if let Some(shared) = snapshot.get("shared_data").and_then(Value::as_object) {
        if !shared.is_empty() {
            let fields: Vec<String> = shared
                .iter()
                .map(|(key, value)| format!("{key}={}", compact(value)))
                .collect();
            lines.push(format!("  shared: [{}]", fields.join(", ")));
        }
    }

    lines.join("\n")
}

fn compact(value: &Value) -> String {
    let rendered = match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if rendered.chars().count() > 40 {
        let truncated: String = rendered.chars().take(40).collect();
        format!("{truncated}…")
    } else {
        rendered
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::format_state_for_display;

    #[test]
    fn renders_episodes_and_shared_data() {
        let snapshot = json!({
            "consultation_id": "abc12345",
            "turn_count": 4,
            "conversation_mode": "extraction",
            "episodes": [{
                "episode_id": 1,
                "questions_answered": ["gq_1", "vl_1"],
                "questions_satisfied": ["gq_1", "vl_1", "vl_2"],
                "follow_up_blocks_activated": [],
                "follow_up_blocks_completed": [],
                "vl_present": true,
            }],
            "shared_data": {"medications": ["latanoprost"]},
        });

        let view = format_state_for_display(&snapshot);
        assert!(view.contains("consultation abc12345 | turn 4 | mode extraction"));
        assert!(view.contains("episode 1: 2 answered"));
        assert!(view.contains("vl_present=true"));
        assert!(view.contains("shared: [medications="));
        assert!(!view.contains("questions_satisfied="));
    }
}
