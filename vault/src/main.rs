use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vault::config::collection_key_from_env;
use vault::crypto::EnvelopeCodec;
use vault::index::NodeCursor;
use vault::storage::{Backend, DirBackend};
use vault::{CollectionMeta, FragmentStore, IndexHandle, StoreConfig};

const USAGE: &str = "usage: vault <collection> [index]";

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vault=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!(
        "Loaded configuration: data_directory={}, max_fragment_bytes={}",
        config.data_directory.display(),
        config.max_fragment_bytes
    );

    let mut args = std::env::args().skip(1);
    let Some(collection) = args.next() else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };
    let index = args.next();

    let backend: Arc<dyn Backend> = Arc::new(DirBackend::new(config.data_directory.clone()));

    let Some(index) = index else {
        match backend.list(&collection) {
            Ok(names) => {
                for name in names {
                    println!("{name}");
                }
            }
            Err(e) => {
                tracing::error!("Failed to list collection {collection}: {e}");
                std::process::exit(1);
            }
        }
        return;
    };

    let key = match collection_key_from_env() {
        Ok(key) => key,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };
    let codec = EnvelopeCodec::default();
    let meta = match CollectionMeta::load(backend.as_ref(), &codec, &key, &collection) {
        Ok(Some(meta)) => meta,
        Ok(None) => {
            tracing::error!("Collection {collection} has no metadata");
            std::process::exit(1);
        }
        Err(e) => {
            tracing::error!("Failed to load metadata of {collection}: {e}");
            std::process::exit(1);
        }
    };
    let options = match meta.index_options(&collection, &index, key) {
        Ok(options) => options.codec(codec).with_config(&config),
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };
    let store = match FragmentStore::open(options, backend) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open index {index}: {e}");
            std::process::exit(1);
        }
    };

    let (handle, task) = IndexHandle::spawn(store);
    let mut cursor = NodeCursor::new();
    let mut total = 0;
    loop {
        match handle.next_node(&mut cursor).await {
            Ok(Some((range, payload))) => {
                println!("{range} {}", payload.len());
                total += payload.len();
            }
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read fragment: {e}");
                std::process::exit(1);
            }
        }
    }
    println!("total {total}");

    if let Err(e) = handle.shutdown().await {
        tracing::warn!("Index task did not shut down cleanly: {e}");
    }
    if let Err(e) = task.await {
        tracing::warn!("Index task failed: {e}");
    }
}
