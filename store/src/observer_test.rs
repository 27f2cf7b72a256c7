use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    (count, move |_: &u32| {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn notify_reaches_every_listener_once() {
    let registry = ObserverRegistry::<u32>::new();
    let (a, listener_a) = counter();
    let (b, listener_b) = counter();
    let _sub_a = registry.subscribe(listener_a);
    let _sub_b = registry.subscribe(listener_b);

    registry.notify(&1);
    registry.notify(&2);

    assert_eq!(a.load(Ordering::SeqCst), 2);
    assert_eq!(b.load(Ordering::SeqCst), 2);
}

#[test]
fn dropping_subscription_removes_listener() {
    let registry = ObserverRegistry::<u32>::new();
    let (count, listener) = counter();
    let sub = registry.subscribe(listener);
    registry.notify(&1);
    drop(sub);
    registry.notify(&2);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty());
}

#[test]
fn unsubscribe_is_explicit_drop() {
    let registry = ObserverRegistry::<u32>::new();
    let (count, listener) = counter();
    registry.subscribe(listener).unsubscribe();
    registry.notify(&1);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn detached_listener_outlives_guard() {
    let registry = ObserverRegistry::<u32>::new();
    let (count, listener) = counter();
    registry.subscribe(listener).detach();
    registry.notify(&1);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(registry.len(), 1);
}

#[test]
fn listeners_run_in_registration_order() {
    let registry = ObserverRegistry::<u32>::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let first = Arc::clone(&seen);
    let second = Arc::clone(&seen);
    let _a = registry.subscribe(move |_| lock(&first).push("first"));
    let _b = registry.subscribe(move |_| lock(&second).push("second"));

    registry.notify(&0);
    assert_eq!(*lock(&seen), vec!["first", "second"]);
}

#[test]
fn listener_removed_mid_round_is_skipped() {
    let registry = ObserverRegistry::<u32>::new();
    let victim_slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let (count, victim) = counter();

    let slot = Arc::clone(&victim_slot);
    let _killer = registry.subscribe(move |_| {
        lock(&slot).take();
    });
    *lock(&victim_slot) = Some(registry.subscribe(victim));

    registry.notify(&0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn subscription_outliving_registry_is_harmless() {
    let registry = ObserverRegistry::<u32>::new();
    let (_count, listener) = counter();
    let sub = registry.subscribe(listener);
    drop(registry);
    drop(sub);
}
