//! Audit trail — every decision, vote, and change, indexed by request.
//!
//! Append-only with an event-type-agnostic request index. Trimming is
//! amortized: it only fires once the index is 20% over capacity, then
//! evicts the oldest whole requests in one batch and rebuilds the index.
//! A hard cap on total events backstops pathological single-request floods.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;

/// Hard cap on total stored events.
const MAX_TOTAL_EVENTS: usize = 50_000;

/// A single auditable event in the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: f64,
    /// "research", "vote", "selection", "review", "config", "preference",
    /// or "delivery".
    pub event_type: String,
    pub request_id: String,
    pub details: HashMap<String, Value>,
}

impl AuditEvent {
    pub fn summary(&self) -> String {
        let detail = self
            .details
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or("");
        format!("[{}] {detail}", self.event_type)
    }
}

#[derive(Debug, Default)]
struct TrailState {
    events: Vec<AuditEvent>,
    request_index: HashMap<String, Vec<usize>>,
}

/// Aggregate audit statistics.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AuditStats {
    pub total_events: usize,
    pub tracked_requests: usize,
    pub events_by_type: HashMap<String, usize>,
}

pub struct AuditTrail {
    max_requests: usize,
    state: Mutex<TrailState>,
}

impl AuditTrail {
    pub fn new(max_requests: usize) -> Self {
        Self {
            max_requests: max_requests.max(1),
            state: Mutex::new(TrailState::default()),
        }
    }

    /// Record an audit event.
    pub fn record(&self, event_type: &str, request_id: &str, details: HashMap<String, Value>) {
        let mut state = lock_state(&self.state);
        let idx = state.events.len();
        state.events.push(AuditEvent {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            event_type: event_type.to_string(),
            request_id: request_id.to_string(),
            details,
        });
        state
            .request_index
            .entry(request_id.to_string())
            .or_default()
            .push(idx);
        self.trim(&mut state);
    }

    // ──────────────────────────────────────────────────────────────
    // Convenience recording methods
    // ──────────────────────────────────────────────────────────────

    pub fn record_research(
        &self,
        request_id: &str,
        agent_id: &str,
        candidate_count: usize,
        latency_ms: f64,
    ) {
        self.record(
            "research",
            request_id,
            details([
                ("agent_id", Value::from(agent_id)),
                ("candidate_count", Value::from(candidate_count)),
                ("latency_ms", Value::from((latency_ms * 10.0).round() / 10.0)),
                (
                    "summary",
                    Value::from(format!(
                        "{agent_id} produced {candidate_count} candidates in {latency_ms:.0}ms"
                    )),
                ),
            ]),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_vote(
        &self,
        request_id: &str,
        expert_id: &str,
        candidate_id: &str,
        keep: bool,
        confidence: f64,
        rationale: &str,
        risk_note: &str,
        arbitrated: bool,
    ) {
        let verdict = if keep { "KEEP" } else { "DROP" };
        let suffix = if arbitrated { " [arbitrated]" } else { "" };
        self.record(
            "vote",
            request_id,
            details([
                ("expert_id", Value::from(expert_id)),
                ("candidate_id", Value::from(candidate_id)),
                ("keep", Value::from(keep)),
                ("confidence", Value::from(confidence)),
                ("rationale", Value::from(rationale)),
                ("risk_note", Value::from(risk_note)),
                ("arbitrated", Value::from(arbitrated)),
                (
                    "summary",
                    Value::from(format!(
                        "{expert_id} {verdict} {candidate_id} (conf={confidence:.2}){suffix}"
                    )),
                ),
            ]),
        );
    }

    pub fn record_selection(
        &self,
        request_id: &str,
        candidate_id: &str,
        title: &str,
        selected: bool,
        reason: &str,
        composite_score: f64,
    ) {
        let verdict = if selected { "SELECTED" } else { "REJECTED" };
        let short_title: String = title.chars().take(50).collect();
        self.record(
            "selection",
            request_id,
            details([
                ("candidate_id", Value::from(candidate_id)),
                ("title", Value::from(title)),
                ("selected", Value::from(selected)),
                ("reason", Value::from(reason)),
                ("composite_score", Value::from((composite_score * 1000.0).round() / 1000.0)),
                (
                    "summary",
                    Value::from(format!(
                        "{verdict} {short_title} (score={composite_score:.3}): {reason}"
                    )),
                ),
            ]),
        );
    }

    pub fn record_review(
        &self,
        request_id: &str,
        reviewer_id: &str,
        candidate_id: &str,
        field_name: &str,
        before: &str,
        after: &str,
    ) {
        let changed = before != after;
        let verb = if changed { "rewrote" } else { "kept" };
        self.record(
            "review",
            request_id,
            details([
                ("reviewer_id", Value::from(reviewer_id)),
                ("candidate_id", Value::from(candidate_id)),
                ("field", Value::from(field_name)),
                ("changed", Value::from(changed)),
                ("before_len", Value::from(before.len())),
                ("after_len", Value::from(after.len())),
                (
                    "summary",
                    Value::from(format!("{reviewer_id} {verb} {field_name} for {candidate_id}")),
                ),
            ]),
        );
    }

    pub fn record_config_change(
        &self,
        request_id: &str,
        path: &str,
        old_value: &str,
        new_value: &str,
        source: &str,
    ) {
        self.record(
            "config",
            request_id,
            details([
                ("path", Value::from(path)),
                ("old", Value::from(old_value)),
                ("new", Value::from(new_value)),
                ("source", Value::from(source)),
                (
                    "summary",
                    Value::from(format!("Config {path}: {old_value} -> {new_value} (by {source})")),
                ),
            ]),
        );
    }

    pub fn record_preference(&self, request_id: &str, user_id: &str, action: &str, detail: &str) {
        self.record(
            "preference",
            request_id,
            details([
                ("user_id", Value::from(user_id)),
                ("action", Value::from(action)),
                ("detail", Value::from(detail)),
                (
                    "summary",
                    Value::from(format!("Preference update for {user_id}: {action} — {detail}")),
                ),
            ]),
        );
    }

    pub fn record_delivery(
        &self,
        request_id: &str,
        user_id: &str,
        item_count: usize,
        briefing_type: &str,
        total_elapsed_s: f64,
    ) {
        self.record(
            "delivery",
            request_id,
            details([
                ("user_id", Value::from(user_id)),
                ("item_count", Value::from(item_count)),
                ("briefing_type", Value::from(briefing_type)),
                ("total_elapsed_s", Value::from((total_elapsed_s * 1000.0).round() / 1000.0)),
                (
                    "summary",
                    Value::from(format!(
                        "Delivered {item_count} items ({briefing_type}) to {user_id} in {total_elapsed_s:.2}s"
                    )),
                ),
            ]),
        );
    }

    // ──────────────────────────────────────────────────────────────
    // Query methods
    // ──────────────────────────────────────────────────────────────

    /// Full audit trace for a request, in recording order.
    pub fn get_request_trace(&self, request_id: &str) -> Vec<AuditEvent> {
        let state = lock_state(&self.state);
        state
            .request_index
            .get(request_id)
            .map(|indices| indices.iter().map(|&i| state.events[i].clone()).collect())
            .unwrap_or_default()
    }

    /// All expert votes for a request, grouped by expert.
    pub fn get_expert_votes(&self, request_id: &str) -> HashMap<String, Vec<AuditEvent>> {
        let mut votes: HashMap<String, Vec<AuditEvent>> = HashMap::new();
        for event in self.get_request_trace(request_id) {
            if event.event_type == "vote" {
                let expert = event
                    .details
                    .get("expert_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                votes.entry(expert).or_default().push(event);
            }
        }
        votes
    }

    /// Human-readable audit report for a request.
    pub fn format_request_report(&self, request_id: &str) -> String {
        let trace = self.get_request_trace(request_id);
        if trace.is_empty() {
            return format!("No audit data for request {request_id}");
        }

        let mut by_type: HashMap<&str, Vec<&AuditEvent>> = HashMap::new();
        for event in &trace {
            by_type.entry(event.event_type.as_str()).or_default().push(event);
        }

        let mut lines = vec![format!("AUDIT REPORT: {request_id}"), "=".repeat(60)];

        if let Some(research) = by_type.get("research") {
            lines.push("\n--- RESEARCH PHASE ---".to_string());
            let mut total = 0u64;
            for e in research {
                lines.push(format!("  {}", e.summary()));
                total += e
                    .details
                    .get("candidate_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
            }
            lines.push(format!("  Total raw candidates: {total}"));
        }

        if let Some(votes) = by_type.get("vote") {
            lines.push("\n--- EXPERT COUNCIL ---".to_string());
            let mut tally: HashMap<&str, (usize, usize)> = HashMap::new();
            for e in votes {
                let cid = e.details.get("candidate_id").and_then(Value::as_str).unwrap_or("?");
                let entry = tally.entry(cid).or_default();
                if e.details.get("keep").and_then(Value::as_bool).unwrap_or(false) {
                    entry.0 += 1;
                } else {
                    entry.1 += 1;
                }
            }
            let mut sorted: Vec<(&str, (usize, usize))> = tally.into_iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            for (cid, (keep, drop)) in sorted {
                let verdict = if keep > drop { "ACCEPTED" } else { "REJECTED" };
                lines.push(format!("  {cid}: {keep} keep / {drop} drop -> {verdict}"));
            }
            let arbitrated = votes
                .iter()
                .filter(|e| e.details.get("arbitrated").and_then(Value::as_bool).unwrap_or(false))
                .count();
            if arbitrated > 0 {
                lines.push(format!("  ({arbitrated} votes revised through arbitration)"));
            }
        }

        if let Some(reviews) = by_type.get("review") {
            lines.push("\n--- EDITORIAL REVIEW ---".to_string());
            let rewritten = reviews
                .iter()
                .filter(|e| e.details.get("changed").and_then(Value::as_bool).unwrap_or(false))
                .count();
            lines.push(format!(
                "  {rewritten}/{} fields rewritten by editorial agents",
                reviews.len()
            ));
        }

        if let Some(deliveries) = by_type.get("delivery") {
            lines.push("\n--- DELIVERY ---".to_string());
            for e in deliveries {
                lines.push(format!("  {}", e.summary()));
            }
        }

        if let Some(configs) = by_type.get("config") {
            lines.push("\n--- CONFIGURATION CHANGES ---".to_string());
            for e in configs {
                lines.push(format!("  {}", e.summary()));
            }
        }

        lines.join("\n")
    }

    pub fn stats(&self) -> AuditStats {
        let state = lock_state(&self.state);
        let mut events_by_type: HashMap<String, usize> = HashMap::new();
        for event in &state.events {
            *events_by_type.entry(event.event_type.clone()).or_insert(0) += 1;
        }
        AuditStats {
            total_events: state.events.len(),
            tracked_requests: state.request_index.len(),
            events_by_type,
        }
    }

    /// Batched eviction of the oldest whole requests.
    ///
    /// Only triggers when 20% over capacity so the O(n) rebuild is
    /// amortized; running it on every record() at capacity would make
    /// appends quadratic.
    fn trim(&self, state: &mut TrailState) {
        let over_requests = state.request_index.len() > self.max_requests + self.max_requests / 5;
        let over_events = state.events.len() > MAX_TOTAL_EVENTS;
        if !over_requests && !over_events {
            return;
        }

        let overshoot = state
            .request_index
            .len()
            .saturating_sub(self.max_requests)
            .max(self.max_requests / 5)
            .max(1);

        // Oldest requests by first event index.
        let mut by_first: Vec<(String, usize)> = state
            .request_index
            .iter()
            .map(|(rid, indices)| (rid.clone(), indices.first().copied().unwrap_or(0)))
            .collect();
        by_first.sort_by_key(|(_, first)| *first);

        let drop_requests: std::collections::HashSet<String> = by_first
            .into_iter()
            .take(overshoot)
            .map(|(rid, _)| rid)
            .collect();

        let events = std::mem::take(&mut state.events);
        state.events = events
            .into_iter()
            .filter(|e| !drop_requests.contains(&e.request_id))
            .collect();

        state.request_index.clear();
        for (i, event) in state.events.iter().enumerate() {
            state
                .request_index
                .entry(event.request_id.clone())
                .or_default()
                .push(i);
        }

        tracing::debug!(
            dropped = drop_requests.len(),
            remaining_events = state.events.len(),
            "Audit trail trimmed"
        );
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(50)
    }
}

fn details<const N: usize>(pairs: [(&str, Value); N]) -> HashMap<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn lock_state(m: &Mutex<TrailState>) -> std::sync::MutexGuard<'_, TrailState> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_preserves_recording_order() {
        let trail = AuditTrail::new(50);
        trail.record_research("req-1", "agent_a", 5, 120.0);
        trail.record_vote("req-1", "expert_q", "c1", true, 0.8, "solid", "none", false);
        trail.record_delivery("req-1", "u1", 3, "morning_digest", 1.5);

        let trace = trail.get_request_trace("req-1");
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0].event_type, "research");
        assert_eq!(trace[1].event_type, "vote");
        assert_eq!(trace[2].event_type, "delivery");
    }

    #[test]
    fn expert_votes_grouped_by_expert() {
        let trail = AuditTrail::new(50);
        trail.record_vote("req-1", "expert_q", "c1", true, 0.8, "r", "n", false);
        trail.record_vote("req-1", "expert_q", "c2", false, 0.6, "r", "n", false);
        trail.record_vote("req-1", "expert_r", "c1", true, 0.7, "r", "n", true);

        let votes = trail.get_expert_votes("req-1");
        assert_eq!(votes["expert_q"].len(), 2);
        assert_eq!(votes["expert_r"].len(), 1);
    }

    #[test]
    fn trim_only_fires_past_batch_threshold() {
        let trail = AuditTrail::new(10);
        // 11 requests: over max but under max + max/5 = 12 — no trim yet.
        for i in 0..11 {
            trail.record_research(&format!("req-{i}"), "agent_a", 1, 10.0);
        }
        assert_eq!(trail.stats().tracked_requests, 11);

        // Two more pushes it over the 20% overshoot — batch eviction fires.
        trail.record_research("req-11", "agent_a", 1, 10.0);
        trail.record_research("req-12", "agent_a", 1, 10.0);
        let stats = trail.stats();
        assert!(stats.tracked_requests <= 11);
        // The oldest requests went first.
        assert!(trail.get_request_trace("req-0").is_empty());
        assert!(!trail.get_request_trace("req-12").is_empty());
    }

    #[test]
    fn report_includes_all_phases() {
        let trail = AuditTrail::new(50);
        trail.record_research("req-1", "agent_a", 5, 100.0);
        trail.record_vote("req-1", "expert_q", "c1", true, 0.8, "r", "n", true);
        trail.record_review("req-1", "review_agent_style", "c1", "why_it_matters", "a", "b");
        trail.record_delivery("req-1", "u1", 3, "morning_digest", 2.0);

        let report = trail.format_request_report("req-1");
        assert!(report.contains("RESEARCH PHASE"));
        assert!(report.contains("EXPERT COUNCIL"));
        assert!(report.contains("1 votes revised through arbitration"));
        assert!(report.contains("EDITORIAL REVIEW"));
        assert!(report.contains("DELIVERY"));
    }

    #[test]
    fn missing_request_reports_no_data() {
        let trail = AuditTrail::new(50);
        assert!(trail.format_request_report("req-x").contains("No audit data"));
    }
}
