use super::*;
use crate::map::MemoryMap;
use crate::lock;
use serde::Deserialize;
use serde_json::json;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Card {
    title: String,
    x: f64,
    y: f64,
}

fn card(title: &str) -> Card {
    Card { title: title.to_owned(), x: 0.0, y: 0.0 }
}

fn cards() -> (Arc<MemoryMap>, RecordMap<MemoryMap, Card>) {
    let map = Arc::new(MemoryMap::new());
    let records = RecordMap::new(Arc::clone(&map), "card");
    (map, records)
}

#[test]
fn insert_writes_one_key_per_record() {
    let (map, records) = cards();
    records.insert("c1", &card("first")).expect("insert");

    assert_eq!(map.keys(), vec!["card/c1".to_owned()]);
    assert_eq!(records.get("c1").expect("valid"), Some(card("first")));
    assert_eq!(records.get("missing").expect("valid"), None);
}

#[test]
fn update_is_a_single_write() {
    let (map, records) = cards();
    records.insert("c1", &card("first")).expect("insert");

    let writes = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&writes);
    let _sub = map.on_change(move |_| *lock(&sink) += 1);

    let found = records
        .update("c1", |c| {
            c.x = 4.0;
            c.title = "moved".into();
        })
        .expect("update");
    assert!(found);
    assert_eq!(*lock(&writes), 1);
    assert_eq!(records.get("c1").expect("valid").map(|c| c.x), Some(4.0));
}

#[test]
fn update_of_missing_record_is_noop() {
    let (map, records) = cards();
    assert!(!records.update("ghost", |c| c.x = 1.0).expect("update"));
    assert!(map.is_empty());
}

#[test]
fn remove_deletes_the_key() {
    let (map, records) = cards();
    records.insert("c1", &card("first")).expect("insert");
    assert!(records.remove("c1"));
    assert!(map.is_empty());
    assert!(!records.remove("c1"));
}

#[test]
fn list_skips_malformed_and_foreign_keys() {
    let (map, records) = cards();
    records.insert("a", &card("a")).expect("insert");
    map.set("card/bad", json!({"title": 3}));
    map.set("other/x", json!({"title": "x", "x": 0, "y": 0}));
    records.insert("b", &card("b")).expect("insert");

    let ids: Vec<String> = records.list().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["a".to_owned(), "b".to_owned()]);
    assert_eq!(records.ids(), vec!["a".to_owned(), "bad".to_owned(), "b".to_owned()]);
    assert!(matches!(records.get("bad"), Err(StoreError::Schema { .. })));
}

#[test]
fn subscribe_reports_ids_in_namespace() {
    let (map, records) = cards();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = records.subscribe(move |id| lock(&sink).push(id.to_owned()));

    records.insert("c1", &card("x")).expect("insert");
    map.set("unrelated", json!(1));
    records.remove("c1");

    assert_eq!(*lock(&seen), vec!["c1".to_owned(), "c1".to_owned()]);
}
