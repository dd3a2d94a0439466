//! The async handle over a real directory.

use futures::future::join_all;

use crate::index::{IndexHandle, NodeCursor};
use crate::scenario_tests::helpers::*;
use crate::types::{Slot, Value};

#[tokio::test]
async fn test_parallel_clients() {
    let collection = TestCollection::new();
    let (handle, task) = IndexHandle::spawn(collection.open("age", 700));

    let writes = (0..8u32).map(|client| {
        let handle = handle.clone();
        async move {
            for i in 0..25 {
                let n = client * 25 + i;
                handle
                    .add(
                        Value::Number(f64::from(n % 10)),
                        doc(usize::try_from(n).expect("small")),
                        false,
                        false,
                    )
                    .await?;
            }
            Ok::<(), crate::index::IndexError>(())
        }
    });
    for result in join_all(writes).await {
        result.expect("client");
    }

    let slot = handle.lookup(Value::Number(3.0)).await.expect("lookup");
    assert_eq!(slot.map(|s| s.len()), Some(20));
    handle.shutdown().await.expect("shutdown");
    task.await.expect("join");

    let (handle, _task) = IndexHandle::spawn(collection.open("age", 700));
    let mut cursor = NodeCursor::new();
    let mut values = 0;
    while let Some((_, payload)) = handle.next_node(&mut cursor).await.expect("node") {
        values += payload.values().map(Slot::len).sum::<usize>();
    }
    assert_eq!(values, 200);
}

#[tokio::test]
async fn test_lookup_after_deferred_adds() {
    let collection = TestCollection::new();
    let (handle, _task) = IndexHandle::spawn(collection.open("email", 700));
    for i in 0..10 {
        handle.add(email(i), doc(i), true, false).await.expect("add");
    }
    // Deferred changes are visible before they are written.
    assert_eq!(
        handle.lookup(email(4)).await.expect("lookup"),
        Some(Slot::Single(doc(4)))
    );
    assert!(collection.fragment_names("email").is_empty());
}
