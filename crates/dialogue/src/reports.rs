//! Finalize-time report writers.
//!
//! The orchestrator owns invocation and path management; the writers here
//! are deliberately thin.  The clinical JSON is the clinical view verbatim;
//! the summary is a deterministic plain-text digest of the summary view (a
//! model-written narrative can replace it behind the same call sites).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// `{prefix}_{YYYYMMDD_HHMMSS}_{short_uuid}.{extension}`
pub fn report_filename(prefix: &str, extension: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let short_id = &Uuid::new_v4().simple().to_string()[..8];
    format!("{prefix}_{timestamp}_{short_id}.{extension}")
}

/// Write the clinical view as pretty-printed JSON.  Returns the full path.
pub fn write_clinical_json(clinical_view: &Value, output_dir: &Path) -> Result<(PathBuf, String)> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create {}", output_dir.display()))?;
    let filename = report_filename("consultation", "json");
    let path = output_dir.join(&filename);
    std::fs::write(&path, serde_json::to_string_pretty(clinical_view)?)
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok((path, filename))
}

/// Render and write the plain-text summary.  Returns the full path.
pub fn write_summary(summary_view: &Value, output_dir: &Path) -> Result<(PathBuf, String)> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create {}", output_dir.display()))?;
    let filename = report_filename("summary", "txt");
    let path = output_dir.join(&filename);
    std::fs::write(&path, render_summary(summary_view))
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok((path, filename))
}

fn render_summary(summary_view: &Value) -> String {
    let mut out = String::from("CONSULTATION SUMMARY\n====================\n");

    if let Some(episodes) = summary_view.get("episodes").and_then(Value::as_array) {
        for episode in episodes {
            let id = episode.get("episode_id").and_then(Value::as_u64).unwrap_or(0);
            out.push_str(&format!("\nEpisode {id}\n---------\n"));

            let Some(map) = episode.as_object() else { continue };
            let mut wrote_field = false;
            for (key, value) in map {
                if matches!(
                    key.as_str(),
                    "episode_id"
                        | "timestamp_started"
                        | "timestamp_last_updated"
                        | "questions_answered"
                        | "questions_satisfied"
                        | "follow_up_blocks_activated"
                        | "follow_up_blocks_completed"
                ) {
                    continue;
                }
                out.push_str(&format!("  {key}: {}\n", render_value(value)));
                wrote_field = true;
            }
            if !wrote_field {
                out.push_str("  (no clinical findings recorded)\n");
            }
        }
    }

    if let Some(shared) = summary_view.get("shared_data").and_then(Value::as_object) {
        if !shared.is_empty() {
            out.push_str("\nShared information\n------------------\n");
            for (key, value) in shared {
                out.push_str(&format!("  {key}: {}\n", render_value(value)));
            }
        }
    }

    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{render_summary, write_clinical_json};

    #[test]
    fn summary_lists_episode_fields_and_shared_data() {
        let view = json!({
            "episodes": [{
                "episode_id": 1,
                "questions_answered": ["gq_1"],
                "vl_present": true,
                "vl_laterality": "right",
            }],
            "shared_data": {"medications": ["latanoprost", "timolol"]},
        });

        let summary = render_summary(&view);
        assert!(summary.contains("Episode 1"));
        assert!(summary.contains("vl_laterality: right"));
        assert!(summary.contains("medications: latanoprost, timolol"));
        assert!(!summary.contains("questions_answered"));
    }

    #[test]
    fn clinical_json_lands_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let view = json!({"episodes": [], "shared_data": {}});
        let (path, filename) = write_clinical_json(&view, dir.path()).unwrap();
        assert!(path.exists());
        assert!(filename.starts_with("consultation_"));
        assert!(filename.ends_with(".json"));
    }
}
