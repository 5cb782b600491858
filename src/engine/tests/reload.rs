use super::*;

const WITHOUT_PUBLIC: &str = r#"
@id("admins-view")
permit (principal in Group::"admins", action == Action::"view", resource);
"#;

#[test]
fn test_reload_policy() {
    let engine = photo_engine(PHOTO_POLICIES);
    let request = user_request("bob", "view", r#"Photo::"beach""#);
    assert_allow(&engine.evaluate(&request));

    engine.reload_from_str(WITHOUT_PUBLIC).unwrap();
    assert_deny(&engine.evaluate(&request));
}

#[test]
fn test_reload_from_str_keeps_entities() {
    let engine = photo_engine(PHOTO_POLICIES);
    engine.reload_from_str(WITHOUT_PUBLIC).unwrap();

    let snapshot = engine.current_snapshot();
    assert_eq!(snapshot.entities().len(), photo_entities().len());
    assert_allow(&engine.evaluate(&user_request("alice", "view", r#"Photo::"beach""#)));
}

#[test]
fn test_failed_reload_keeps_previous_slice() {
    let engine = photo_engine(PHOTO_POLICIES);
    let before = engine.current_version();

    assert!(matches!(
        engine.reload_from_str("permit (principal, action, resource"),
        Err(PolicyError::ParseError(_))
    ));
    assert!(matches!(
        engine.reload_from_json(r#"{"policies": {"a": 5}}"#),
        Err(PolicyError::InvalidFormat(_))
    ));
    let cyclic = r#"{"entities": [
        { "uid": {"type": "Group", "id": "a"}, "parents": [{"type": "Group", "id": "a"}] }
    ]}"#;
    assert!(matches!(
        engine.reload_from_json(cyclic),
        Err(PolicyError::CyclicHierarchy(_))
    ));

    assert_eq!(engine.current_version(), before);
    assert_allow(&engine.evaluate(&user_request("bob", "view", r#"Photo::"beach""#)));
}

#[test]
fn test_version_changes_on_reload() {
    let engine = photo_engine(PHOTO_POLICIES);
    let first = engine.current_version();

    engine.reload_from_str(WITHOUT_PUBLIC).unwrap();
    let second = engine.current_version();
    assert_ne!(first.hash, second.hash);

    let decision = engine.evaluate(&user_request("alice", "view", r#"Photo::"beach""#));
    assert_eq!(decision.version, second);
}

#[test]
fn test_same_content_same_hash() {
    let engine = photo_engine(PHOTO_POLICIES);
    let first = engine.current_version();

    engine.reload_slice(photo_slice(PHOTO_POLICIES));
    assert_eq!(engine.current_version().hash, first.hash);
}

#[test]
fn test_reload_from_json_replaces_everything() {
    let engine = photo_engine(PHOTO_POLICIES);
    engine
        .reload_from_json(
            r#"{
                "policies": {
                    "carol-view": "permit (principal == User::\"carol\", action == Action::\"view\", resource);"
                },
                "entities": [ { "uid": {"type": "User", "id": "carol"} } ]
            }"#,
        )
        .unwrap();

    assert_eq!(engine.current_snapshot().entities().len(), 1);
    assert_allow(&engine.evaluate(&user_request("carol", "view", r#"Photo::"beach""#)));
    assert_deny(&engine.evaluate(&user_request("alice", "view", r#"Photo::"beach""#)));
}

#[test]
fn test_snapshot_survives_reload() {
    let engine = photo_engine(PHOTO_POLICIES);
    let held = engine.current_snapshot();

    engine.reload_from_str(WITHOUT_PUBLIC).unwrap();

    let request = user_request("bob", "view", r#"Photo::"beach""#);
    assert!(crate::is_authorized(&held, &request).allowed);
    assert_deny(&engine.evaluate(&request));
}

#[test]
fn test_policy_reload_during_evaluation() {
    use std::thread;

    let engine = photo_engine(PHOTO_POLICIES);
    let hashes = [
        engine.current_version().hash,
        photo_slice(WITHOUT_PUBLIC).version().hash.clone(),
    ];

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let hashes = hashes.clone();
            thread::spawn(move || {
                let request = user_request("bob", "view", r#"Photo::"beach""#);
                for _ in 0..200 {
                    let decision = engine.evaluate(&request);
                    // Every decision comes from one complete slice.
                    if decision.version.hash == hashes[0] {
                        assert!(decision.allowed);
                        assert_eq!(decision.policy_ids(), vec!["public-view"]);
                    } else {
                        assert_eq!(decision.version.hash, hashes[1]);
                        assert!(!decision.allowed);
                    }
                }
            })
        })
        .collect();

    let writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            for i in 0..50 {
                let text = if i % 2 == 0 { WITHOUT_PUBLIC } else { PHOTO_POLICIES };
                engine.reload_from_str(text).unwrap();
            }
        })
    };

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn test_clones_share_the_slice() {
    let engine = photo_engine(PHOTO_POLICIES);
    let clone = engine.clone();
    engine.reload_from_str(WITHOUT_PUBLIC).unwrap();
    assert_eq!(clone.current_version(), engine.current_version());
    assert!(Arc::ptr_eq(&clone.current_snapshot(), &engine.current_snapshot()));
}

#[test]
fn test_reloads_do_not_lose_updates() {
    use std::thread;

    let engine = photo_engine(PHOTO_POLICIES);
    let documents: Vec<String> = (0..50)
        .map(|i| {
            format!(
                r#"{{
                    "policies": {{ "guest-view": "permit (principal == User::\"guest{i}\", action, resource);" }},
                    "entities": [ {{ "uid": {{"type": "User", "id": "guest{i}"}} }} ]
                }}"#
            )
        })
        .collect();
    let last_guest = uid(r#"User::"guest49""#);

    let policy_writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            for i in 0..200 {
                let text = if i % 2 == 0 { WITHOUT_PUBLIC } else { PHOTO_POLICIES };
                engine.reload_from_str(text).unwrap();
            }
        })
    };
    let slice_writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            for document in &documents {
                engine.reload_from_json(document).unwrap();
            }
        })
    };

    slice_writer.join().unwrap();
    policy_writer.join().unwrap();

    // Policy-only reloads keep whatever entities the last slice reload set.
    let snapshot = engine.current_snapshot();
    assert_eq!(snapshot.entities().len(), 1);
    assert!(snapshot.entities().contains(&last_guest));
}
