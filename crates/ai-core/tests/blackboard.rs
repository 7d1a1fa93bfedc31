use ai_core::{BbKey, Blackboard};

#[test]
fn blackboard_set_get_remove_roundtrip() {
    let k_u32 = BbKey::<u32>::new(1);
    let k_str = BbKey::<String>::new(2);

    let mut bb = Blackboard::new();
    assert!(!bb.contains(k_u32));

    bb.set(k_u32, 123);
    bb.set(k_str, "hello".to_string());

    assert_eq!(bb.get(k_u32).copied(), Some(123));
    assert_eq!(bb.get(k_str).map(|s| s.as_str()), Some("hello"));

    assert_eq!(bb.remove(k_u32), Some(123));
    assert_eq!(bb.get(k_u32), None);
}

#[test]
#[should_panic(expected = "blackboard type mismatch")]
fn blackboard_type_mismatch_panics() {
    let mut bb = Blackboard::new();
    bb.set(BbKey::<u32>::new(1), 1u32);
    let _ = bb.get(BbKey::<i32>::new(1));
}

#[test]
fn observers_only_hear_about_their_key() {
    let hp = BbKey::<i32>::new(10);
    let ammo = BbKey::<i32>::new(11);

    let mut bb = Blackboard::new();
    let watcher = bb.register_observer(hp.id());

    bb.set(ammo, 3);
    assert!(bb.drain_notifications().is_empty());

    bb.set(hp, 50);
    bb.set(hp, 40);
    assert_eq!(bb.drain_notifications(), vec![(watcher, hp.id())]);

    // Drained: nothing left until the next write.
    assert!(bb.drain_notifications().is_empty());
}

#[test]
fn set_if_changed_skips_equal_values() {
    let flag = BbKey::<bool>::new(3);
    let mut bb = Blackboard::new();
    let watcher = bb.register_observer(flag.id());

    assert!(bb.set_if_changed(flag, true));
    assert_eq!(bb.drain_notifications().len(), 1);

    assert!(!bb.set_if_changed(flag, true));
    assert!(bb.drain_notifications().is_empty());

    assert!(bb.unregister_observer(watcher));
    assert_eq!(bb.observer_count(flag.id()), 0);
    bb.set(flag, false);
    assert!(bb.drain_notifications().is_empty());
}

#[test]
fn remove_and_manual_notify_reach_observers() {
    let target = BbKey::<u64>::new(7);
    let mut bb = Blackboard::new();
    bb.set(target, 9);

    let a = bb.register_observer(target.id());
    let b = bb.register_observer(target.id());

    assert_eq!(bb.remove(target), Some(9));
    assert_eq!(bb.drain_notifications(), vec![(a, 7), (b, 7)]);

    bb.notify_changed(target.id());
    assert_eq!(bb.drain_notifications().len(), 2);
}
