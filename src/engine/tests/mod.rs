use std::sync::{Arc, OnceLock};

use super::*;
use crate::snapshot_decision;
use crate::types::{AttrValue, Entity, EvaluationErrorKind, PolicyMatchReason, RequestContext};
use crate::{PolicyError, UnknownEntityMode};
use yare::parameterized;

mod reload;

const PHOTO_POLICIES: &str = r#"
@id("admins-view")
permit (
    principal in Group::"admins",
    action == Action::"view",
    resource
);

@id("owner-write")
permit (
    principal,
    action in [Action::"write"],
    resource is Photo
) when {
    resource.owner == principal
};

@id("public-view")
permit (
    principal,
    action == Action::"view",
    resource in Album::"public"
);
"#;

const PHOTO_ENTITIES: &str = r#"[
    { "uid": {"type": "User", "id": "alice"}, "attrs": {"level": 5}, "parents": [{"type": "Group", "id": "admins"}] },
    { "uid": {"type": "User", "id": "bob"}, "attrs": {"level": 1}, "parents": [{"type": "Group", "id": "users"}] },
    { "uid": {"type": "Group", "id": "admins"}, "parents": [{"type": "Group", "id": "users"}] },
    { "uid": {"type": "Photo", "id": "beach"}, "attrs": {"owner": {"__entity": {"type": "User", "id": "bob"}}}, "parents": [{"type": "Album", "id": "public"}] },
    { "uid": {"type": "Photo", "id": "orphan"}, "parents": [{"type": "Album", "id": "private"}] },
    { "uid": {"type": "Action", "id": "edit"}, "parents": [{"type": "Action", "id": "write"}] }
]"#;

fn photo_entities() -> Vec<Entity> {
    serde_json::from_str(PHOTO_ENTITIES).expect("photo entities should parse")
}

fn photo_slice(policies: &str) -> Slice {
    Slice::builder()
        .policy_text(policies)
        .expect("policies should parse")
        .entities(photo_entities())
        .build()
        .expect("photo slice should build")
}

fn photo_engine(policies: &str) -> PolicyEngine {
    PolicyEngine::from_slice(photo_slice(policies))
}

fn uid(text: &str) -> EntityUid {
    text.parse().expect("valid uid")
}

/// `User::"<user>"` doing `Action::"<action>"` on `<resource>`.
fn user_request(user: &str, action: &str, resource: &str) -> Request {
    Request::new(
        EntityUid::from_parts("User", user).unwrap(),
        EntityUid::from_parts("Action", action).unwrap(),
        uid(resource),
    )
}

fn assert_allow(decision: &Decision) {
    assert!(decision.allowed, "expected allow, got {decision}");
}

fn assert_deny(decision: &Decision) {
    assert!(!decision.allowed, "expected deny, got {decision}");
}

#[derive(Clone)]
struct SharedLogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

struct SharedLogWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedLogBuffer {
    type Writer = SharedLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SharedLogWriter(Arc::clone(&self.0))
    }
}

impl std::io::Write for SharedLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Process-wide log capture; install once, read with `logs()`.
fn log_sink() -> SharedLogBuffer {
    static LOG_SINK: OnceLock<SharedLogBuffer> = OnceLock::new();
    LOG_SINK
        .get_or_init(|| {
            let sink = SharedLogBuffer(Arc::new(std::sync::Mutex::new(Vec::new())));
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .without_time()
                .with_target(false)
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(sink.clone())
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .expect("global test subscriber should initialize");
            tracing::callsite::rebuild_interest_cache();
            sink
        })
        .clone()
}

impl SharedLogBuffer {
    fn logs(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}
