//! Fragments sealed with one key do not open with another.

use crate::crypto::{CodecError, CollectionKey};
use crate::index::IndexError;
use crate::scenario_tests::helpers::*;
use crate::storage::FragmentError;

#[test]
fn test_wrong_key_fails_loads_not_open() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 800);
    add_emails(&mut store, 40);
    drop(store);

    let mut options = collection.options("email", 800);
    options.key = CollectionKey::new([1; 32]);
    let mut wrong = collection.open_with(options);
    assert!(!wrong.known_ranges().is_empty());
    assert!(matches!(
        wrong.lookup(email(3)),
        Err(IndexError::Fragment(FragmentError::Codec(CodecError::InvalidKey)))
    ));
    // Nothing was overwritten with the wrong key.
    let mut right = collection.open("email", 800);
    assert!(right.lookup(email(3)).expect("lookup").is_some());
}

#[test]
fn test_tampered_fragment() {
    let collection = TestCollection::new();
    let mut store = collection.open("email", 100_000);
    add_emails(&mut store, 10);
    drop(store);

    let name = collection.fragment_names("email").remove(0);
    let path = collection.dir.path().join(COLLECTION).join(name);
    let mut bytes = std::fs::read(&path).expect("read");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    std::fs::write(&path, bytes).expect("write");

    let mut reopened = collection.open("email", 100_000);
    assert!(matches!(
        reopened.lookup(email(1)),
        Err(IndexError::Fragment(FragmentError::Codec(CodecError::InvalidKey)))
    ));
}
