use poolledger::{Arena, ArenaError, Table};

#[test]
fn stale_key_cannot_reach_a_recycled_slot() {
    let mut arena = Arena::new(4);
    let first = arena.insert("first").unwrap();
    assert_eq!(arena.remove(first), Some("first"));
    assert_eq!(arena.remove(first), None);

    let second = arena.insert("second").unwrap();
    assert_eq!(second.index(), first.index());
    assert_ne!(second.generation(), first.generation());
    assert_eq!(arena.get(first), None);
    assert_eq!(arena.get(second), Some(&"second"));
    assert_eq!(arena.recycled(), 1);
}

#[test]
fn full_arena_reports_exhaustion_until_a_slot_frees() {
    let mut arena = Arena::new(2);
    let a = arena.insert(1).unwrap();
    arena.insert(2).unwrap();
    assert_eq!(arena.headroom(), 0);
    assert_eq!(arena.insert(3), Err(ArenaError::Exhausted { capacity: 2 }));

    arena.remove(a);
    assert_eq!(arena.headroom(), 1);
    arena.insert(3).unwrap();
    assert_eq!(arena.len(), 2);
}

#[test]
fn table_insert_replaces_in_place() {
    let mut table: Table<u64, &str> = Table::new(1);
    assert_eq!(table.insert(7, "a").unwrap(), None);
    assert_eq!(table.insert(7, "b").unwrap(), Some("a"));
    assert_eq!(table.get(&7), Some(&"b"));
    assert_eq!(table.len(), 1);
    assert!(matches!(
        table.insert(8, "c"),
        Err(ArenaError::Exhausted { capacity: 1 })
    ));
}

#[test]
fn table_range_scans_in_key_order() {
    let mut table: Table<(u64, String), u32> = Table::new(16);
    for (range, name, value) in [(3, "b", 1), (1, "z", 2), (3, "a", 3), (5, "a", 4)] {
        table.insert((range, name.to_string()), value).unwrap();
    }
    let hits: Vec<u32> = table
        .range((1, String::new())..(4, String::new()))
        .map(|(_, value)| *value)
        .collect();
    assert_eq!(hits, vec![2, 3, 1]);

    let keys = table.keys_in((3, String::new())..);
    assert_eq!(keys.len(), 3);
    for key in &keys {
        table.remove(key);
    }
    assert_eq!(table.len(), 1);
    assert_eq!(table.headroom(), 15);
}

#[test]
fn get_or_insert_with_seeds_once() {
    let mut table: Table<&str, u32> = Table::new(4);
    *table.get_or_insert_with("k", || 10).unwrap() += 1;
    *table.get_or_insert_with("k", || 100).unwrap() += 1;
    assert_eq!(table.get(&"k"), Some(&12));
    assert!(table.contains_key(&"k"));
}
