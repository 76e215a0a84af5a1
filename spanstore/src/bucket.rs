use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::ObjectStore;
use tracing::info;

/// Deletes every object in the bucket. One-shot startup wipe for test and
/// development environments.
pub async fn empty_bucket(store: Arc<dyn ObjectStore>) -> Result<()> {
    let locations = store
        .list(None)
        .map_ok(|meta| meta.location)
        .boxed();
    let deleted: Vec<Path> = store
        .delete_stream(locations)
        .try_collect()
        .await
        .with_context(|| "deleting objects")?;
    info!("emptied bucket, {} objects deleted", deleted.len());
    Ok(())
}
