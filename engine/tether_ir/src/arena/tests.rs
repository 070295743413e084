use super::*;

#[test]
fn insert_and_get() {
    let mut arena = Arena::new();
    let a = arena.insert("a");
    let b = arena.insert("b");
    assert_eq!(arena.get(a), Some(&"a"));
    assert_eq!(arena.get(b), Some(&"b"));
    assert_eq!(arena.len(), 2);
}

#[test]
fn removed_handle_goes_stale() {
    let mut arena = Arena::new();
    let a = arena.insert(1);
    assert_eq!(arena.remove(a), Some(1));
    assert!(!arena.contains(a));
    assert_eq!(arena.remove(a), None);
    assert!(arena.is_empty());
}

#[test]
fn reused_slot_rejects_old_handle() {
    let mut arena = Arena::new();
    let old = arena.insert(1);
    arena.remove(old);
    let new = arena.insert(2);

    assert_eq!(old.index(), new.index());
    assert_ne!(old.generation(), new.generation());
    assert_eq!(arena.get(old), None);
    assert_eq!(arena.get(new), Some(&2));
    assert_eq!(arena.slot_count(), 1);
}

#[test]
fn get_mut_respects_generation() {
    let mut arena = Arena::new();
    let old = arena.insert(String::from("x"));
    arena.remove(old);
    let new = arena.insert(String::from("y"));

    assert!(arena.get_mut(old).is_none());
    if let Some(value) = arena.get_mut(new) {
        value.push('!');
    }
    assert_eq!(arena.get(new).map(String::as_str), Some("y!"));
}

#[test]
fn iter_skips_free_slots() {
    let mut arena = Arena::new();
    let a = arena.insert('a');
    let b = arena.insert('b');
    let c = arena.insert('c');
    arena.remove(b);

    let live: Vec<_> = arena.iter().map(|(h, v)| (h, *v)).collect();
    assert_eq!(live, vec![(a, 'a'), (c, 'c')]);
}

#[test]
fn handles_hash_by_index_and_generation() {
    use std::collections::HashSet;

    let mut arena = Arena::new();
    let old = arena.insert(0);
    arena.remove(old);
    let new = arena.insert(0);

    let mut set = HashSet::new();
    set.insert(old);
    set.insert(new);
    set.insert(new);
    assert_eq!(set.len(), 2);
}
