//! Fire-and-forget analytics writer.
//!
//! The pipeline calls `record_*` methods which enqueue onto a bounded
//! channel drained by a background task; writes land as JSONL batch files
//! under the state directory. Errors never propagate to the pipeline: a
//! full queue or a failed write is logged and dropped.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::experts::ChairSnapshot;
use crate::types::{CandidateItem, DebateVote, DeliveryPayload, GeoRiskEntry, TrendSnapshot};

/// Bounded queue size; overflow is logged and dropped.
const QUEUE_CAP: usize = 1024;

#[derive(Debug)]
struct Record {
    kind: &'static str,
    request_id: String,
    payload: Value,
}

#[derive(Clone)]
pub struct AnalyticsWriter {
    tx: Option<mpsc::Sender<Record>>,
}

impl AnalyticsWriter {
    /// Spawn the background drain task writing under `dir`.
    pub fn spawn(dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::channel::<Record>(QUEUE_CAP);
        tokio::spawn(async move {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                tracing::warn!(error = %e, "Analytics dir creation failed, records will drop");
            }
            while let Some(record) = rx.recv().await {
                let path = dir.join(format!("analytics-{}.jsonl", Utc::now().format("%Y-%m-%d")));
                let line = json!({
                    "ts": epoch_secs(),
                    "kind": record.kind,
                    "request_id": record.request_id,
                    "data": record.payload,
                });
                let write = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .and_then(|mut f| {
                        use std::io::Write;
                        writeln!(f, "{line}")
                    });
                if let Err(e) = write {
                    tracing::warn!(error = %e, "Analytics write failed, record dropped");
                }
            }
        });
        Self { tx: Some(tx) }
    }

    /// A writer that drops everything. For tests and analytics-off deployments.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    fn enqueue(&self, kind: &'static str, request_id: &str, payload: Value) {
        let Some(tx) = &self.tx else { return };
        let record = Record {
            kind,
            request_id: request_id.to_string(),
            payload,
        };
        if let Err(e) = tx.try_send(record) {
            tracing::warn!(kind, error = %e, "Analytics queue full, record dropped");
        }
    }

    pub fn record_request_start(
        &self,
        request_id: &str,
        user_id: &str,
        prompt: &str,
        max_items: usize,
    ) {
        self.enqueue(
            "request_start",
            request_id,
            json!({
                "user_id": user_id,
                "prompt": prompt.chars().take(200).collect::<String>(),
                "max_items": max_items,
            }),
        );
    }

    pub fn record_candidates(
        &self,
        request_id: &str,
        candidates: &[CandidateItem],
        selected_ids: &HashSet<String>,
    ) {
        let rows: Vec<Value> = candidates
            .iter()
            .map(|c| {
                json!({
                    "candidate_id": c.candidate_id,
                    "source": c.source,
                    "topic": c.topic,
                    "composite": c.composite_score(),
                    "urgency": c.urgency.to_string(),
                    "selected": selected_ids.contains(&c.candidate_id),
                })
            })
            .collect();
        self.enqueue("candidates", request_id, Value::Array(rows));
    }

    pub fn record_expert_votes(&self, request_id: &str, votes: &[DebateVote]) {
        let rows: Vec<Value> = votes
            .iter()
            .map(|v| {
                json!({
                    "expert_id": v.expert_id,
                    "candidate_id": v.candidate_id,
                    "keep": v.keep,
                    "confidence": v.confidence,
                    "arbitrated": v.arbitrated,
                })
            })
            .collect();
        self.enqueue("expert_votes", request_id, Value::Array(rows));
    }

    pub fn record_briefing(&self, request_id: &str, payload: &DeliveryPayload) {
        self.enqueue(
            "briefing",
            request_id,
            json!({
                "user_id": payload.user_id,
                "item_count": payload.items.len(),
                "briefing_type": payload.briefing_type.to_string(),
                "thread_count": payload.threads.len(),
            }),
        );
    }

    pub fn record_georisk_snapshot(&self, request_id: &str, entries: &[GeoRiskEntry]) {
        self.enqueue(
            "georisk",
            request_id,
            serde_json::to_value(entries).unwrap_or_default(),
        );
    }

    pub fn record_trend_snapshot(&self, request_id: &str, trends: &[TrendSnapshot]) {
        self.enqueue(
            "trends",
            request_id,
            serde_json::to_value(trends).unwrap_or_default(),
        );
    }

    pub fn record_credibility_snapshot(&self, request_id: &str, snapshot: &Value) {
        self.enqueue("credibility", request_id, snapshot.clone());
    }

    pub fn record_expert_snapshot(&self, request_id: &str, chair: &ChairSnapshot) {
        self.enqueue(
            "expert_chair",
            request_id,
            serde_json::to_value(chair).unwrap_or_default(),
        );
    }

    pub fn record_agent_performance(
        &self,
        request_id: &str,
        agent_id: &str,
        candidate_count: usize,
        selected_count: usize,
        latency_ms: f64,
    ) {
        self.enqueue(
            "agent_performance",
            request_id,
            json!({
                "agent_id": agent_id,
                "candidates": candidate_count,
                "selected": selected_count,
                "latency_ms": latency_ms,
            }),
        );
    }

    pub fn record_feedback(&self, user_id: &str, text: &str, changes: &Value) {
        self.enqueue(
            "feedback",
            &format!("feedback-{user_id}"),
            json!({
                "user_id": user_id,
                "text": text.chars().take(300).collect::<String>(),
                "changes": changes,
            }),
        );
    }

    pub fn record_request_complete(
        &self,
        request_id: &str,
        candidate_count: usize,
        selected_count: usize,
        briefing_type: &str,
        elapsed_s: f64,
    ) {
        self.enqueue(
            "request_complete",
            request_id,
            json!({
                "candidates": candidate_count,
                "selected": selected_count,
                "briefing_type": briefing_type,
                "elapsed_s": elapsed_s,
            }),
        );
    }

    /// Delete analytics batch files older than the retention cutoff.
    pub fn cleanup_old_records(dir: &std::path::Path, retention_days: u64) -> usize {
        let cutoff = SystemTime::now() - std::time::Duration::from_secs(retention_days * 86_400);
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut deleted = 0;
        for entry in entries.flatten() {
            let is_batch = entry
                .file_name()
                .to_string_lossy()
                .starts_with("analytics-");
            let old = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|m| m < cutoff)
                .unwrap_or(false);
            if is_batch && old && std::fs::remove_file(entry.path()).is_ok() {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, retention_days, "Old analytics batches removed");
        }
        deleted
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_writer_swallows_everything() {
        let writer = AnalyticsWriter::disabled();
        writer.record_request_start("req-1", "u1", "prompt", 10);
        writer.record_feedback("u1", "more geopolitics", &json!({}));
        // No panic, no error — that's the contract.
    }

    #[tokio::test]
    async fn spawned_writer_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let writer = AnalyticsWriter::spawn(dir.path().to_path_buf());
        writer.record_request_start("req-1", "u1", "prompt text", 10);
        writer.record_request_complete("req-1", 20, 5, "morning_digest", 1.2);

        // Give the drain task a moment.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        let mut found = false;
        for entry in std::fs::read_dir(dir.path()).unwrap().flatten() {
            let content = std::fs::read_to_string(entry.path()).unwrap();
            if content.contains("request_start") && content.contains("request_complete") {
                found = true;
            }
        }
        assert!(found, "expected analytics JSONL batch file");
    }

    #[tokio::test]
    async fn cleanup_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let old_file = dir.path().join("analytics-2020-01-01.jsonl");
        std::fs::write(&old_file, "{}\n").unwrap();
        // Fresh file mtime — retention 0 days deletes it.
        let deleted = AnalyticsWriter::cleanup_old_records(dir.path(), 0);
        assert_eq!(deleted, 1);
        assert!(!old_file.exists());
    }
}
