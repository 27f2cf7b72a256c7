use serde_json::json;
use store::notes::{Author, Position};
use store::{Identity, Member};
use uuid::Uuid;

use super::*;

fn member(user_id: &str, name: &str) -> Member {
    Member::from_identity(Uuid::new_v4(), &Identity::new(user_id, name))
}

#[test]
fn note_line_prefers_author_name_and_marks_own_vote() {
    let note = Note {
        id: "n1".to_owned(),
        position: Position { x: 10.0, y: 20.5 },
        author: Author::new("ann").named("Ann"),
        text: "ship it".to_owned(),
        votes: 2,
        voted_by_me: true,
    };
    assert_eq!(note_line(&note), "n1  [2*]  \"ship it\"  by Ann at (10, 20.5)");
}

#[test]
fn note_line_falls_back_to_author_id() {
    let note = Note {
        id: "n2".to_owned(),
        position: Position { x: 0.0, y: 0.0 },
        author: Author::new("bo"),
        text: String::new(),
        votes: 0,
        voted_by_me: false,
    };
    assert!(note_line(&note).contains("[0]"));
    assert!(note_line(&note).contains("by bo"));
}

#[test]
fn change_line_names_known_peers() {
    let feed = PresenceFeed::new(member("me", "Me"));
    let bo = member("bo", "Bo");
    feed.join(bo.clone());

    let set = ValueChanged {
        key: "dice_value".to_owned(),
        previous: None,
        value: Some(json!(4)),
        origin: Origin::Remote(bo.client_id),
    };
    assert_eq!(change_line(&set, &feed), "Bo: dice_value = 4");

    let stranger = Uuid::new_v4();
    let delete = ValueChanged { key: "k".to_owned(), previous: Some(json!(1)), value: None, origin: Origin::Remote(stranger) };
    assert_eq!(change_line(&delete, &feed), format!("{stranger}: k deleted"));
    assert_eq!(origin_label(Origin::Local, &feed), "me");
}

#[test]
fn presence_line_skips_channel_updates() {
    let bo = member("bo", "Bo");
    assert_eq!(presence_line(&PresenceEvent::Joined(bo.clone())).as_deref(), Some("+ Bo joined"));
    assert_eq!(presence_line(&PresenceEvent::Left(bo.clone())).as_deref(), Some("- Bo left"));
    let update = PresenceEvent::Updated { client_id: bo.client_id, channel: "cursor".to_owned(), value: json!({}) };
    assert_eq!(presence_line(&update), None);
}
