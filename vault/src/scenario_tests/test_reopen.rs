//! Data and seed survive closing and reopening the collection.

use crate::crypto::EnvelopeCodec;
use crate::meta::CollectionMeta;
use crate::scenario_tests::helpers::*;
use crate::types::{Slot, Value};

#[test]
fn test_reopen_keeps_entries() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 900);
    add_emails(&mut store, 120);
    store.remove(email(5), None, false).expect("remove");
    store
        .add(email(6), Value::from("replaced"), false, true)
        .expect("replace");
    drop(store);

    let mut reopened = collection.open("email", 900);
    assert_eq!(reopened.lookup(email(5)).expect("lookup"), None);
    assert_eq!(
        reopened.lookup(email(6)).expect("lookup"),
        Some(Slot::Single(Value::from("replaced")))
    );
    for i in 7..120 {
        assert_eq!(
            reopened.lookup(email(i)).expect("lookup"),
            Some(Slot::Single(doc(i))),
        );
    }
}

#[test]
fn test_seed_is_persisted() {
    let collection = TestCollection::new();
    let codec = EnvelopeCodec::default();
    let loaded = CollectionMeta::load_or_create(
        collection.backend.as_ref(),
        &codec,
        &collection.key,
        COLLECTION,
    )
    .expect("load");
    assert_eq!(loaded, collection.meta);
    assert_eq!(
        loaded.seed().expect("seed"),
        collection.meta.seed().expect("seed")
    );
    assert!(loaded.index("age").is_some());
}

#[test]
fn test_indexes_do_not_share_files() {
    let collection = TestCollection::new();
    let mut emails = collection.open("email", 900);
    let mut primary = collection.open("index", 900);
    add_emails(&mut emails, 30);
    primary
        .add(Value::from("doc-0001"), Value::from("payload"), false, false)
        .expect("add");

    assert_eq!(collection.fragment_names("index").len(), 1);
    drop(emails);
    let reopened = collection.open("email", 900);
    assert_eq!(
        collection.fragment_names("email").len(),
        reopened.known_ranges().len()
    );
}
