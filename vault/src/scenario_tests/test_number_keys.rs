//! Multi-valued number index.

use crate::scenario_tests::helpers::*;
use crate::types::{Slot, Value};

#[test]
fn test_ages_collect_documents() {
    let collection = TestCollection::new();
    let mut ages = collection.open("age", 600);
    for i in 0..90 {
        let age = f64::from(u32::try_from(i % 30).expect("small"));
        ages.add(Value::Number(age), doc(i), false, false).expect("add");
    }
    drop(ages);

    let mut reopened = collection.open("age", 600);
    assert_eq!(
        reopened.lookup(Value::Number(4.0)).expect("lookup"),
        Some(Slot::Many(vec![doc(4), doc(34), doc(64)]))
    );
    assert!(reopened
        .remove(Value::Number(4.0), Some(doc(34)), false)
        .expect("remove"));
    assert_eq!(
        reopened.lookup(Value::Number(4.0)).expect("lookup"),
        Some(Slot::Many(vec![doc(4), doc(64)]))
    );
    assert_eq!(reopened.lookup(Value::Number(31.0)).expect("lookup"), None);
}

#[test]
fn test_add_is_idempotent_per_value() {
    let collection = TestCollection::new();
    let mut ages = collection.open("age", 600);
    ages.add(Value::Number(7.0), doc(1), false, false).expect("add");
    ages.add(Value::Number(7.0), doc(1), false, false).expect("add again");
    assert_eq!(
        ages.lookup(Value::Number(7.0)).expect("lookup").map(|slot| slot.len()),
        Some(1)
    );
}
