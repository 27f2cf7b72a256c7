use super::*;
use crate::map::SharedMap;
use crate::presence::{CURSOR, PresenceEvent};
use serde_json::json;

fn identity(name: &str) -> Identity {
    Identity::new(name, name)
}

#[test]
fn attach_to_unknown_container_fails() {
    let service = LocalService::new();
    let missing = ContainerId::generate();
    let err = service.attach(&missing, &identity("a")).err().expect("must fail");
    assert!(matches!(err, ServiceError::ContainerNotFound(id) if id == missing));
}

#[test]
fn writes_reach_peers_only_after_process() {
    let service = LocalService::new();
    let id = service.create();
    let a = service.attach(&id, &identity("a")).expect("attach");
    let b = service.attach(&id, &identity("b")).expect("attach");

    a.map().set("k", json!(1));
    assert_eq!(b.map().get("k"), None);
    assert!(service.pending() > 0);

    service.process();
    assert_eq!(b.map().get("k"), Some(json!(1)));
    assert!(!a.map().has_pending());
    assert_eq!(service.pending(), 0);
}

#[test]
fn concurrent_writes_converge_to_later_sequenced_value() {
    let service = LocalService::new();
    let id = service.create();
    let a = service.attach(&id, &identity("a")).expect("attach");
    let b = service.attach(&id, &identity("b")).expect("attach");
    service.process();

    a.map().set("dice_value", json!(2));
    b.map().set("dice_value", json!(5));
    // Each replica sees its own optimistic write before delivery.
    assert_eq!(a.map().get("dice_value"), Some(json!(2)));
    assert_eq!(b.map().get("dice_value"), Some(json!(5)));

    service.process();
    assert_eq!(a.map().get("dice_value"), Some(json!(5)));
    assert_eq!(b.map().get("dice_value"), Some(json!(5)));
    assert_eq!(service.snapshot(&id).expect("exists"), vec![("dice_value".to_owned(), json!(5))]);
}

#[test]
fn late_joiner_receives_snapshot() {
    let service = LocalService::new();
    let id = service.create();
    let a = service.attach(&id, &identity("a")).expect("attach");
    a.map().set("first", json!(1));
    a.map().set("second", json!(2));
    service.process();

    let b = service.attach(&id, &identity("b")).expect("attach");
    assert_eq!(b.map().keys(), vec!["first".to_owned(), "second".to_owned()]);
    assert_eq!(b.presence().members().len(), 2);
}

#[test]
fn presence_goes_to_peers_and_leave_on_drop() {
    let service = LocalService::new();
    let id = service.create();
    let a = service.attach(&id, &identity("a")).expect("attach");
    let b = service.attach(&id, &identity("b")).expect("attach");
    service.process();
    assert_eq!(a.presence().members().len(), 2);

    let left = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&left);
    let _sub = a.presence().subscribe(move |event| {
        if let PresenceEvent::Left(member) = event {
            lock(&sink).push(member.client_id);
        }
    });

    b.presence().set_local(CURSOR, json!({"x": 1, "y": 2}));
    service.process();
    assert_eq!(a.presence().state(b.client_id(), CURSOR), Some(json!({"x": 1, "y": 2})));

    let b_id = b.client_id();
    drop(b);
    service.process();
    assert_eq!(*lock(&left), vec![b_id]);
    assert_eq!(a.presence().members().len(), 1);
}

#[test]
fn listener_writes_are_drained_in_same_process_call() {
    let service = LocalService::new();
    let id = service.create();
    let a = service.attach(&id, &identity("a")).expect("attach");
    let b = service.attach(&id, &identity("b")).expect("attach");

    let writer = Arc::downgrade(b.map());
    let _sub = b.map().on_value_changed(Arc::new(move |event: &crate::map::ValueChanged| {
        if event.key == "ping" && !event.is_local() {
            if let Some(map) = writer.upgrade() {
                map.set("pong", json!(true));
            }
        }
    }));

    a.map().set("ping", json!(true));
    service.process();
    assert_eq!(a.map().get("pong"), Some(json!(true)));
}
