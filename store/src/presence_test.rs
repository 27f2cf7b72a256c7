use super::*;
use crate::map::MapOp;
use serde_json::json;
use uuid::Uuid;

fn member(name: &str) -> Member {
    Member { client_id: Uuid::new_v4(), user_id: name.to_owned(), name: name.to_owned(), color: "#3b82f6".into() }
}

fn recorder(feed: &PresenceFeed) -> (Arc<Mutex<Vec<PresenceEvent>>>, Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = feed.subscribe(move |event| lock(&sink).push(event.clone()));
    (seen, sub)
}

#[derive(Default)]
struct PresenceOutbox {
    sent: Mutex<Vec<(String, Value)>>,
}

impl Outbox for PresenceOutbox {
    fn submit_op(&self, _op: MapOp) {}

    fn submit_presence(&self, channel: &str, value: Value) {
        lock(&self.sent).push((channel.to_owned(), value));
    }
}

#[test]
fn local_member_is_always_listed() {
    let me = member("me");
    let feed = PresenceFeed::new(me.clone());
    assert_eq!(feed.members(), vec![me.clone()]);
    assert_eq!(feed.leave(me.client_id), None);
    assert_eq!(feed.members().len(), 1);
}

#[test]
fn join_is_idempotent_and_leave_clears_state() {
    let feed = PresenceFeed::new(member("me"));
    let peer = member("peer");
    let (seen, _sub) = recorder(&feed);

    assert!(feed.join(peer.clone()));
    assert!(!feed.join(peer.clone()));
    feed.apply_remote(peer.client_id, CURSOR, json!({"x": 1, "y": 2}));
    assert_eq!(feed.leave(peer.client_id), Some(peer.clone()));
    assert_eq!(feed.state(peer.client_id, CURSOR), None);

    let seen = lock(&seen);
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], PresenceEvent::Joined(peer.clone()));
    assert_eq!(seen[2], PresenceEvent::Left(peer));
}

#[test]
fn update_from_unknown_client_is_ignored() {
    let feed = PresenceFeed::new(member("me"));
    let (seen, _sub) = recorder(&feed);
    let stranger = Uuid::new_v4();
    feed.apply_remote(stranger, CURSOR, json!({"x": 0, "y": 0}));
    assert_eq!(feed.state(stranger, CURSOR), None);
    assert!(lock(&seen).is_empty());
}

#[test]
fn latest_value_wins_per_channel() {
    let feed = PresenceFeed::new(member("me"));
    let peer = member("peer");
    feed.join(peer.clone());
    feed.apply_remote(peer.client_id, CURSOR, json!({"x": 1, "y": 1}));
    feed.apply_remote(peer.client_id, CURSOR, json!({"x": 9, "y": 9}));
    feed.apply_remote(peer.client_id, DRAG, json!({"id": "n1", "x": 0, "y": 0}));

    let cursors = feed.remote_states_as::<Cursor>(CURSOR);
    assert_eq!(cursors.len(), 1);
    assert_eq!(cursors[0].1, Cursor { x: 9.0, y: 9.0 });
    assert_eq!(feed.states(DRAG).len(), 1);
}

#[test]
fn set_local_forwards_through_outbox() {
    let outbox = Arc::new(PresenceOutbox::default());
    let me = member("me");
    let feed = PresenceFeed::connected(me.clone(), outbox.clone());
    feed.set_local_as(CURSOR, &Cursor { x: 3.0, y: 4.0 }).expect("encode");

    assert_eq!(*lock(&outbox.sent), vec![(CURSOR.to_owned(), json!({"x": 3.0, "y": 4.0}))]);
    assert_eq!(feed.state(me.client_id, CURSOR), Some(json!({"x": 3.0, "y": 4.0})));
    assert!(feed.remote_states_as::<Cursor>(CURSOR).is_empty());
}

#[test]
fn highlight_combines_local_and_remote_selection() {
    let feed = PresenceFeed::new(member("me"));
    let peer = member("peer");
    feed.join(peer.clone());

    assert_eq!(highlight(&feed, "n1"), Highlight::None);
    feed.set_local_as(SELECTION, &Selection { ids: vec!["n1".into()] }).expect("encode");
    assert_eq!(highlight(&feed, "n1"), Highlight::Local);
    feed.apply_remote(peer.client_id, SELECTION, json!({"ids": ["n1", "n2"]}));
    assert_eq!(highlight(&feed, "n1"), Highlight::Both);
    assert_eq!(highlight(&feed, "n2"), Highlight::Remote);
    assert_eq!(highlight(&feed, "n2").class_name(), "selected-remote");
}

#[test]
fn load_reconciles_roster() {
    let me = member("me");
    let feed = PresenceFeed::new(me.clone());
    let stays = member("stays");
    let goes = member("goes");
    feed.join(stays.clone());
    feed.join(goes.clone());
    let (seen, _sub) = recorder(&feed);

    let arrives = member("arrives");
    feed.load(
        vec![me.clone(), stays.clone(), arrives.clone()],
        vec![(arrives.client_id, CURSOR.to_owned(), json!({"x": 5, "y": 5}))],
    );

    assert_eq!(feed.members(), vec![me, stays, arrives.clone()]);
    assert_eq!(feed.state(arrives.client_id, CURSOR), Some(json!({"x": 5, "y": 5})));
    assert_eq!(*lock(&seen), vec![PresenceEvent::Joined(arrives), PresenceEvent::Left(goes)]);
}

#[test]
fn identity_color_is_stable_per_user() {
    let a = Identity::new("alice", "Alice");
    assert_eq!(a.color, Identity::new("alice", "Other name").color);
    assert!(a.color.starts_with('#'));

    let client_id = Uuid::new_v4();
    let member = Member::from_identity(client_id, &a);
    assert_eq!(member.user_id, "alice");
    assert_eq!(member.client_id, client_id);
}
