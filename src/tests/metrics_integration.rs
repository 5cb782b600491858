//! Metrics integration tests
//!
//! The metrics sink is process-wide and tests run in parallel, so every test
//! here uses its own principal and only looks at the events for it.

use crate::metrics::{EvaluationPhases, EvaluationStats, MetricsSink, ReloadStats, set_sink};
use crate::{EngineConfig, PolicyEngine, Request, Slice};
use std::sync::{Arc, Mutex, OnceLock};

const POLICIES: &str = r#"
@id("metrics-view") permit (principal, action == Action::"view", resource);
@id("metrics-deny") forbid (principal, action == Action::"delete", resource);
@id("metrics-broken") permit (principal, action == Action::"edit", resource) when { principal.missing };
"#;

#[derive(Default)]
struct TestMetricsSink {
    evaluations: Mutex<Vec<EvaluationStats>>,
    phases: Mutex<Vec<(String, EvaluationPhases)>>,
    reloads: Mutex<Vec<ReloadStats>>,
}

impl TestMetricsSink {
    fn evaluations_for(&self, principal: &str) -> Vec<EvaluationStats> {
        self.evaluations
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.principal_id == principal)
            .cloned()
            .collect()
    }

    fn phases_for(&self, principal: &str) -> Vec<EvaluationPhases> {
        self.phases
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == principal)
            .map(|(_, phases)| phases.clone())
            .collect()
    }

    fn reloads_with_hash(&self, hash: &str) -> usize {
        self.reloads
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.version_hash == hash)
            .count()
    }
}

impl MetricsSink for TestMetricsSink {
    fn on_evaluation(&self, stats: &EvaluationStats) {
        self.evaluations.lock().unwrap().push(stats.clone());
    }

    fn on_reload(&self, stats: &ReloadStats) {
        self.reloads.lock().unwrap().push(stats.clone());
    }

    fn on_evaluation_phases(&self, stats: &EvaluationStats, phases: &EvaluationPhases) {
        self.phases
            .lock()
            .unwrap()
            .push((stats.principal_id.clone(), phases.clone()));
    }
}

fn sink() -> Arc<TestMetricsSink> {
    static SINK: OnceLock<Arc<TestMetricsSink>> = OnceLock::new();
    SINK.get_or_init(|| {
        let sink = Arc::new(TestMetricsSink::default());
        set_sink(sink.clone());
        sink
    })
    .clone()
}

fn request(user: &str, action: &str) -> Request {
    Request::parse(
        &format!(r#"User::"{user}""#),
        &format!(r#"Action::"{action}""#),
        r#"Doc::"d""#,
    )
    .unwrap()
}

#[test]
fn test_evaluations_are_recorded() {
    let sink = sink();
    let engine = PolicyEngine::new_from_str(POLICIES).unwrap();

    engine.evaluate(&request("metrics-a", "view"));
    engine.evaluate(&request("metrics-a", "delete"));
    engine.evaluate(&request("metrics-a", "edit"));

    let stats = sink.evaluations_for(r#"User::"metrics-a""#);
    assert_eq!(stats.len(), 3);

    assert!(stats[0].allowed);
    assert_eq!(stats[0].determining_policies, vec!["metrics-view"]);
    assert_eq!(stats[0].action_id, r#"Action::"view""#);

    assert!(!stats[1].allowed);
    assert_eq!(stats[1].determining_policies, vec!["metrics-deny"]);

    assert!(!stats[2].allowed);
    assert!(stats[2].determining_policies.is_empty());
    assert_eq!(stats[2].errors, 1);
}

#[test]
fn test_phases_recorded_only_when_enabled() {
    let sink = sink();
    let slice = Slice::from_policy_text(POLICIES).unwrap();

    let plain = PolicyEngine::from_slice(slice.clone());
    plain.evaluate(&request("metrics-plain", "view"));
    assert_eq!(sink.evaluations_for(r#"User::"metrics-plain""#).len(), 1);
    assert!(sink.phases_for(r#"User::"metrics-plain""#).is_empty());

    let timed = PolicyEngine::with_config(slice, EngineConfig::default().with_phase_timings(true));
    timed.evaluate(&request("metrics-timed", "view"));
    let phases = sink.phases_for(r#"User::"metrics-timed""#);
    assert_eq!(phases.len(), 1);
    assert!(phases[0].total_ms >= phases[0].scope_ms + phases[0].conditions_ms);
}

#[test]
fn test_reloads_are_recorded() {
    let sink = sink();
    let engine = PolicyEngine::new_from_str(POLICIES).unwrap();

    let text = r#"@id("metrics-reload-only") permit (principal == User::"metrics-reload", action, resource);"#;
    engine.reload_from_str(text).unwrap();
    let hash = engine.current_version().hash;
    assert_eq!(sink.reloads_with_hash(&hash), 1);

    assert!(engine.reload_from_str("not a policy").is_err());
    assert_eq!(sink.reloads_with_hash(&hash), 1);
}
