//! Opening an index reads the directory listing and no fragment.

use std::sync::Arc;

use crate::index::FragmentStore;
use crate::scenario_tests::helpers::*;
use crate::storage::{Backend, MemoryBackend};
use crate::types::Slot;

#[test]
fn test_open_reads_no_fragments() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 800);
    add_emails(&mut store, 150);
    let ranges = store.known_ranges();
    drop(store);

    // Copy the files into a counting backend.
    let memory = Arc::new(MemoryBackend::new());
    for name in collection.backend.list(COLLECTION).expect("list") {
        let data = collection.backend.read(COLLECTION, &name).expect("read");
        memory.write(COLLECTION, &name, &data).expect("write");
    }
    memory.reset_stats();

    let mut reopened = FragmentStore::open(
        collection.options("email", 800),
        Arc::clone(&memory) as Arc<dyn Backend>,
    )
    .expect("open");
    assert_eq!(reopened.known_ranges(), ranges);
    assert_eq!(memory.stats().reads, 0);
    assert_eq!(memory.stats().lists, 1);
    assert_eq!(reopened.stats().resident_ranges, 0);

    assert_eq!(
        reopened.lookup(email(77)).expect("lookup"),
        Some(Slot::Single(doc(77)))
    );
    assert_eq!(memory.stats().reads, 1);
    assert_eq!(memory.stats().writes, 0);
}

#[test]
fn test_new_index_is_one_empty_fragment() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 800);
    assert_eq!(store.stats().known_ranges, 1);
    assert!(collection.fragment_names("email").is_empty());

    store.add(email(1), doc(1), false, false).expect("add");
    assert_eq!(
        collection.fragment_names("email"),
        vec!["_email_0000000000000000_ffffffffffffffff".to_owned()]
    );
}
