use super::*;
use crate::state::test_helpers;
use frames::Status;
use serde_json::json;

fn set_request(container_id: &ContainerId, key: &str, value: Value) -> Frame {
    let mut data = Map::new();
    data.insert("key".into(), json!(key));
    data.insert("value".into(), value);
    Frame::request("map:set", data).with_container_id(container_id.to_string())
}

fn set(key: &str, value: Value) -> EntryOp {
    EntryOp::Set { key: key.into(), value }
}

#[tokio::test]
async fn set_is_sequenced_stored_and_fanned_out() {
    let state = test_helpers::test_app_state();
    let id = test_helpers::seed_container(&state).await;
    let ann = test_helpers::dummy_member("ann");
    let bo = test_helpers::dummy_member("bo");
    let mut rx_ann = test_helpers::register_client(&state, &id, &ann).await;
    let mut rx_bo = test_helpers::register_client(&state, &id, &bo).await;

    let req = set_request(&id, "dice_value", json!(4));
    let seq = apply(&state, &id, ann.client_id, &req, set("dice_value", json!(4))).await.expect("apply");
    assert_eq!(seq, 1);

    let ack = test_helpers::recv_frame(&mut rx_ann).await;
    assert_eq!(ack.status, Status::Done);
    assert_eq!(ack.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(ack.data["seq"], json!(1));

    let peer = test_helpers::recv_frame(&mut rx_bo).await;
    assert_eq!(peer.status, Status::Request);
    assert_eq!(peer.parent_id, None);
    assert_eq!(peer.syscall, "map:set");
    assert_eq!(peer.container_id.as_deref(), Some(id.as_str()));
    assert_eq!(peer.data["client_id"], json!(ann.client_id.to_string()));
    assert_eq!(peer.data["value"], json!(4));

    let containers = state.containers.read().await;
    assert_eq!(containers[&id].entries.get("dice_value"), Some(&json!(4)));
}

#[tokio::test]
async fn every_client_sees_ops_in_sequence_order() {
    let state = test_helpers::test_app_state();
    let id = test_helpers::seed_container(&state).await;
    let ann = test_helpers::dummy_member("ann");
    let bo = test_helpers::dummy_member("bo");
    let mut rx_ann = test_helpers::register_client(&state, &id, &ann).await;
    let mut rx_bo = test_helpers::register_client(&state, &id, &bo).await;

    let first = set_request(&id, "k", json!("ann"));
    apply(&state, &id, ann.client_id, &first, set("k", json!("ann"))).await.expect("apply");
    let second = set_request(&id, "k", json!("bo"));
    apply(&state, &id, bo.client_id, &second, set("k", json!("bo"))).await.expect("apply");

    for rx in [&mut rx_ann, &mut rx_bo] {
        let a = test_helpers::recv_frame(rx).await;
        let b = test_helpers::recv_frame(rx).await;
        assert_eq!((a.data["seq"].clone(), b.data["seq"].clone()), (json!(1), json!(2)));
    }
    let containers = state.containers.read().await;
    assert_eq!(containers[&id].entries["k"], json!("bo"));
}

#[tokio::test]
async fn delete_of_missing_key_is_still_acked() {
    let state = test_helpers::test_app_state();
    let id = test_helpers::seed_container_with(&state, &[("a", json!(1))]).await;
    let ann = test_helpers::dummy_member("ann");
    let mut rx = test_helpers::register_client(&state, &id, &ann).await;

    let mut data = Map::new();
    data.insert("key".into(), json!("ghost"));
    let req = Frame::request("map:delete", data);
    let seq = apply(&state, &id, ann.client_id, &req, EntryOp::Delete { key: "ghost".into() })
        .await
        .expect("apply");
    assert_eq!(seq, 2);

    let ack = test_helpers::recv_frame(&mut rx).await;
    assert_eq!(ack.syscall, "map:delete");
    assert!(ack.data.get("value").is_none());
}

#[tokio::test]
async fn oversized_value_is_rejected_without_sequencing() {
    let state = test_helpers::test_app_state_with(|cfg| cfg.max_value_bytes = 8);
    let id = test_helpers::seed_container(&state).await;
    let ann = test_helpers::dummy_member("ann");
    let mut rx = test_helpers::register_client(&state, &id, &ann).await;

    let value = json!("this string is far too long");
    let req = set_request(&id, "k", value.clone());
    let err = apply(&state, &id, ann.client_id, &req, set("k", value)).await.expect_err("too large");
    assert_eq!(err.error_code(), "E_VALUE_TOO_LARGE");
    assert!(matches!(err, EntryError::ValueTooLarge { ref key, limit: 8, .. } if key == "k"));

    test_helpers::assert_no_frame(&mut rx).await;
    assert_eq!(state.containers.read().await[&id].seq, 0);
}

#[tokio::test]
async fn unknown_container_is_an_error() {
    let state = test_helpers::test_app_state();
    let id: ContainerId = "gone".parse().expect("id");
    let req = set_request(&id, "k", json!(1));
    let err = apply(&state, &id, Uuid::new_v4(), &req, set("k", json!(1))).await.expect_err("missing");
    assert_eq!(err.error_code(), "E_CONTAINER_NOT_FOUND");
}
