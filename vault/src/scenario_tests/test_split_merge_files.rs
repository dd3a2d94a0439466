//! Fragment files track the tree through splits and merges.

use crate::index::FragmentStore;
use crate::scenario_tests::helpers::*;

fn file_ranges(store: &FragmentStore) -> Vec<String> {
    store
        .known_ranges()
        .iter()
        .map(|range| format!("_email_{range}"))
        .collect()
}

#[test]
fn test_files_follow_splits() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 700);
    for i in 0..200 {
        store.add(email(i), doc(i), false, false).expect("add");
        if i % 25 == 0 {
            assert_eq!(collection.fragment_names("email"), file_ranges(&store));
        }
    }
    assert!(store.known_ranges().len() > 4);
    assert_eq!(collection.fragment_names("email"), file_ranges(&store));
}

#[test]
fn test_files_follow_merges() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 700);
    add_emails(&mut store, 200);
    let peak = store.known_ranges().len();

    for i in 0..200 {
        assert!(store.remove(email(i), None, false).expect("remove"));
        assert_eq!(collection.fragment_names("email"), file_ranges(&store));
    }
    assert!(store.known_ranges().len() < peak);
    for i in 0..200 {
        assert_eq!(store.lookup(email(i)).expect("lookup"), None);
    }
}

#[test]
fn test_deferred_batch_flushes_once() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 700);
    for i in 0..199 {
        store.add(email(i), doc(i), true, false).expect("add");
    }
    assert!(collection.fragment_names("email").is_empty());

    store.add(email(199), doc(199), false, false).expect("add");
    assert_eq!(collection.fragment_names("email"), file_ranges(&store));
    assert_eq!(store.stats().persisted_ranges, store.known_ranges().len());
}
