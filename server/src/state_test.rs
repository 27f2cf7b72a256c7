use super::*;
use serde_json::json;

#[test]
fn container_state_new_is_empty() {
    let cs = ContainerState::new();
    assert!(cs.entries.is_empty());
    assert!(cs.clients.is_empty());
    assert!(cs.members.is_empty());
    assert_eq!(cs.seq, 0);
}

#[test]
fn remove_client_drops_sender_member_and_presence() {
    let mut cs = ContainerState::default();
    let member = test_helpers::dummy_member("ann");
    let (tx, _rx) = mpsc::channel(1);
    cs.clients.insert(member.client_id, tx);
    cs.members.insert(member.client_id, member.clone());
    cs.presence.entry(member.client_id).or_default().insert("cursor".into(), json!({"x": 1, "y": 2}));
    cs.entries.insert("k".into(), json!(1));

    assert_eq!(cs.remove_client(member.client_id), Some(member));
    assert!(cs.clients.is_empty());
    assert!(cs.presence.is_empty());
    assert_eq!(cs.entries.len(), 1, "entries outlive their writer");
}

#[test]
fn member_serializes_flat() {
    let member = test_helpers::dummy_member("ann");
    let value = serde_json::to_value(&member).expect("serialize");
    assert_eq!(value["user_id"], "ann");
    assert_eq!(value["name"], "ANN");
    assert_eq!(value["client_id"], json!(member.client_id.to_string()));
}
