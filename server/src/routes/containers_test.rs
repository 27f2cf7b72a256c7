use super::*;
use crate::state::test_helpers;
use serde_json::json;

#[tokio::test]
async fn list_reports_clients_and_keys() {
    let state = test_helpers::test_app_state();
    let id = test_helpers::seed_container_with(&state, &[("a", json!(1))]).await;
    let _rx = test_helpers::register_client(&state, &id, &test_helpers::dummy_member("ann")).await;

    let Json(list) = list_containers(State(state)).await;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, id);
    assert_eq!((list[0].clients, list[0].keys, list[0].seq), (1, 1, 1));
}

#[tokio::test]
async fn get_returns_snapshot() {
    let state = test_helpers::test_app_state();
    let id = test_helpers::seed_container_with(&state, &[("a", json!(1)), ("b", json!(2))]).await;

    let Json(snapshot) = get_container(State(state), Path(id.to_string())).await.expect("found");
    assert_eq!(snapshot.container_id, id);
    assert_eq!(snapshot.entries.len(), 2);
}

#[tokio::test]
async fn get_maps_errors_to_status() {
    let state = test_helpers::test_app_state();
    let missing = get_container(State(state.clone()), Path("nope".into())).await;
    assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));

    let invalid = get_container(State(state), Path("not valid!".into())).await;
    assert_eq!(invalid.err(), Some(StatusCode::BAD_REQUEST));
}
