use super::*;
use serde_json::json;

fn push(syscall: &str, data: Value) -> Frame {
    let Value::Object(map) = data else {
        panic!("object payload");
    };
    let mut frame = Frame::request(syscall, map);
    frame.status = frames::Status::Done;
    frame
}

#[test]
fn map_requests_carry_container_and_key() {
    let set = map_op_request("c1", &MapOp::Set { key: "k".into(), value: json!(3) });
    assert_eq!(set.syscall, MAP_SET);
    assert_eq!(set.container_id.as_deref(), Some("c1"));
    assert_eq!(set.data, json!({"key": "k", "value": 3}));

    let delete = map_op_request("c1", &MapOp::Delete { key: "k".into() });
    assert_eq!(delete.syscall, MAP_DELETE);
    assert_eq!(delete.data, json!({"key": "k"}));
}

#[test]
fn parses_sequenced_set_and_delete() {
    let client_id = Uuid::new_v4();
    let set = push(MAP_SET, json!({"seq": 7, "client_id": client_id.to_string(), "key": "k", "value": null}));
    let parsed = parse_sequenced(&set).expect("valid");
    assert_eq!(parsed.seq, 7);
    assert_eq!(parsed.client_id, client_id);
    assert_eq!(parsed.op, MapOp::Set { key: "k".into(), value: Value::Null });

    let delete = push(MAP_DELETE, json!({"seq": 8, "client_id": client_id.to_string(), "key": "k"}));
    assert_eq!(parse_sequenced(&delete).expect("valid").op, MapOp::Delete { key: "k".into() });
}

#[test]
fn sequenced_without_seq_is_rejected() {
    let frame = push(MAP_SET, json!({"client_id": Uuid::new_v4().to_string(), "key": "k", "value": 1}));
    assert!(matches!(parse_sequenced(&frame), Err(ClientError::MissingField("seq"))));
}

#[test]
fn parses_attach_snapshot_in_order() {
    let peer = Uuid::new_v4();
    let frame = push(
        CONTAINER_ATTACH,
        json!({
            "container_id": "c1",
            "seq": 2,
            "entries": [{"key": "b", "value": 1}, {"key": "a", "value": 2}],
            "members": [{"client_id": peer.to_string(), "user_id": "u", "name": "U", "color": "#fff"}],
            "presence": [{"client_id": peer.to_string(), "channel": "cursor", "value": {"x": 1, "y": 1}}],
        }),
    );
    let snapshot = parse_snapshot(&frame).expect("valid");
    assert_eq!(snapshot.seq, 2);
    assert_eq!(snapshot.entries, vec![("b".to_owned(), json!(1)), ("a".to_owned(), json!(2))]);
    assert_eq!(snapshot.members[0].client_id, peer);
    assert_eq!(snapshot.presence[0].1, "cursor");
}

#[test]
fn presence_request_shape() {
    let frame = presence_request("c1", "cursor", json!({"x": 1}));
    assert_eq!(frame.syscall, PRESENCE_UPDATE);
    assert_eq!(frame.data, json!({"channel": "cursor", "value": {"x": 1}}));
}
