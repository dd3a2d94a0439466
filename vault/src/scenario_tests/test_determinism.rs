//! The same seed and operations produce the same fragments.

use crate::scenario_tests::helpers::*;

fn run() -> (Vec<String>, Vec<(String, usize)>) {
    let collection = TestCollection::new();
    let mut options = collection.options("email", 700);
    options.seed = crate::index::Seed::from_bytes(&(0..=u8::MAX).rev().collect::<Vec<u8>>())
        .expect("seed");
    let mut store = collection.open_with(options);
    add_emails(&mut store, 150);
    for i in (0..150).step_by(3) {
        store.remove(email(i), None, false).expect("remove");
    }

    let mut sizes = Vec::new();
    store
        .map(None, true, |range, payload| {
            sizes.push((range.to_string(), payload.len()));
            payload.len()
        })
        .expect("map");
    (collection.fragment_names("email"), sizes)
}

#[test]
fn test_deterministic_layout() {
    let first = run();
    let second = run();
    assert_eq!(first, second);
    assert_eq!(first.1.iter().map(|(_, n)| n).sum::<usize>(), 100);
}
