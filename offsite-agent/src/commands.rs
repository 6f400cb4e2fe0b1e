//! The two things the binary can do: sync folders, or print the bucket.

use crate::config::Config;
use crate::ignore::IgnoreMatcher;
use crate::store::RemoteStore;
use crate::sync::{SyncReport, SyncSession};
use crate::utils::errors::Result;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Back up every configured folder. Only setup problems are returned as errors;
/// per-file failures end up in the report.
pub async fn run_sync(
    config: &Config,
    store: Arc<dyn RemoteStore>,
    cancel_token: CancellationToken,
) -> Result<SyncReport> {
    let matcher = IgnoreMatcher::new(&config.folders_to_ignore)?;
    let mut session = SyncSession::with_cancel(store, matcher, cancel_token);

    Ok(session.sync(&config.folders_to_backup).await)
}

/// Log the latest version of every object in the bucket
pub async fn print_contents(store: &dyn RemoteStore) -> Result<usize> {
    info!("Current contents of the bucket:");

    let mut listed = 0;
    let mut versions = store.list_all();
    while let Some(version) = versions.next().await {
        info!("{}", version?.listing_line());
        listed += 1;
    }

    Ok(listed)
}
