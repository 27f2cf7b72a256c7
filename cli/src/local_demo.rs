//! Brainstorm walkthrough against the in-process sequencer.
//!
//! Two users share one board. Every step runs `process()` explicitly so the
//! output shows what each replica sees before and after sequencing.

use std::sync::{Arc, Mutex, PoisonError};

use store::activity::LastEdited;
use store::notes::{Author, Note, NoteBoard, Position};
use store::presence::{SELECTION, Selection, highlight};
use store::service::LocalService;
use store::{Identity, MemoryMap};

use crate::CliError;
use crate::render;

pub fn run() -> Result<Vec<String>, CliError> {
    let service = LocalService::new();
    let id = service.create();
    let mut lines = vec![format!("container {}", id.to_fragment())];

    let ann = service.attach(&id, &Identity::new("ann", "Ann"))?;
    let bo = service.attach(&id, &Identity::new("bo", "Bo"))?;
    service.process();
    let names: Vec<String> = ann.presence().members().into_iter().map(|m| m.name).collect();
    lines.push(format!("members: {}", names.join(", ")));

    let ann_board = NoteBoard::new(Arc::clone(ann.map()), Author::new("ann").named("Ann"));
    let bo_board = NoteBoard::new(Arc::clone(bo.map()), Author::new("bo").named("Bo"));
    let tracker = LastEdited::track(ann.map().as_ref(), ann.client_id());

    let bo_view = bo_board.watch();
    let counts = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&counts);
    let _sub = bo_view.subscribe(move |notes: &Vec<Note>| {
        sink.lock().unwrap_or_else(PoisonError::into_inner).push(notes.len());
    });

    let note_id = ann_board.create_note(Position { x: 120.0, y: 80.0 }, "Ship the relay")?;
    lines.push(format!("ann added {note_id}; bo sees {} notes before sequencing", bo_board.notes().len()));
    service.process();
    let seen = counts.lock().unwrap_or_else(PoisonError::into_inner).clone();
    lines.push(format!("bo's note count after each field: {seen:?}"));

    ann_board.toggle_vote(&note_id)?;
    bo_board.toggle_vote(&note_id)?;
    service.process();
    if let Some(note) = bo_board.note(&note_id) {
        lines.push(render::note_line(&note));
    }

    ann_board.set_text(&note_id, "Ship the relay today")?;
    bo_board.set_text(&note_id, "Ship the relay tomorrow")?;
    service.process();
    lines.push(format!(
        "concurrent edits converge: ann={:?} bo={:?}",
        text_of(&ann_board, &note_id),
        text_of(&bo_board, &note_id)
    ));
    if let Some(member) = tracker.by(ann.presence()) {
        lines.push(format!("last edit by {}", member.name));
    }

    bo.presence().set_local_as(SELECTION, &Selection { ids: vec![note_id.clone()] })?;
    service.process();
    lines.push(format!("ann highlights {note_id} as {}", highlight(ann.presence(), &note_id).class_name()));

    bo_board.delete_note(&note_id)?;
    service.process();
    lines.push(format!("after delete ann sees {} notes", ann_board.notes().len()));

    Ok(lines)
}

fn text_of(board: &NoteBoard<MemoryMap>, note_id: &str) -> String {
    board.note(note_id).map(|note| note.text).unwrap_or_default()
}

#[cfg(test)]
#[path = "local_demo_test.rs"]
mod tests;
