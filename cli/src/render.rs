//! One-line text renderings for terminal output.

use store::notes::Note;
use store::{Member, Origin, PresenceEvent, PresenceFeed, ValueChanged};

pub fn note_line(note: &Note) -> String {
    let author = note.author.name.as_deref().unwrap_or(&note.author.id);
    let mark = if note.voted_by_me { "*" } else { "" };
    format!(
        "{}  [{}{mark}]  {:?}  by {author} at ({}, {})",
        note.id, note.votes, note.text, note.position.x, note.position.y
    )
}

pub fn member_line(member: &Member) -> String {
    format!("{} ({}) {}", member.name, member.user_id, member.color)
}

/// Who caused a change, by display name where the member is known.
pub fn origin_label(origin: Origin, presence: &PresenceFeed) -> String {
    match origin {
        Origin::Local => "me".to_owned(),
        Origin::Remote(client_id) => presence.member(client_id).map_or_else(|| client_id.to_string(), |m| m.name),
        Origin::Snapshot => "snapshot".to_owned(),
    }
}

pub fn change_line(event: &ValueChanged, presence: &PresenceFeed) -> String {
    let who = origin_label(event.origin, presence);
    match &event.value {
        Some(value) => format!("{who}: {} = {value}", event.key),
        None => format!("{who}: {} deleted", event.key),
    }
}

/// Join and leave lines; channel updates are too chatty to print.
pub fn presence_line(event: &PresenceEvent) -> Option<String> {
    match event {
        PresenceEvent::Joined(member) => Some(format!("+ {} joined", member.name)),
        PresenceEvent::Left(member) => Some(format!("- {} left", member.name)),
        PresenceEvent::Updated { .. } => None,
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;
