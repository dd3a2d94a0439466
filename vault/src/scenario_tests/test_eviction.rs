//! A memory ceiling bounds resident fragments without losing data.

use crate::scenario_tests::helpers::*;
use crate::types::Slot;

#[test]
fn test_ceiling_bounds_resident_bytes() {
    let collection = TestCollection::new();
    let options = collection.options("email", 800).memory_ceiling(Some(2_000));
    let mut store = collection.open_with(options);
    add_emails(&mut store, 300);

    let stats = store.stats();
    assert!(stats.resident_bytes <= 2_000);
    assert!(stats.resident_ranges < stats.known_ranges);

    for i in (0..300).rev() {
        assert_eq!(
            store.lookup(email(i)).expect("lookup"),
            Some(Slot::Single(doc(i))),
        );
        assert!(store.stats().resident_bytes <= 2_000);
    }
}

#[test]
fn test_evicted_fragment_is_reloaded_for_update() {
    let collection = TestCollection::new();
    let options = collection.options("email", 800).memory_ceiling(Some(1_000));
    let mut store = collection.open_with(options);
    add_emails(&mut store, 100);

    store.remove(email(0), None, false).expect("remove");
    store.add(email(0), doc(999), false, false).expect("re-add");
    drop(store);

    let mut reopened = collection.open("email", 800);
    assert_eq!(
        reopened.lookup(email(0)).expect("lookup"),
        Some(Slot::Single(doc(999)))
    );
    assert_eq!(
        reopened.lookup(email(99)).expect("lookup"),
        Some(Slot::Single(doc(99)))
    );
}
