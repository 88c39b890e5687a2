//! # Config Watcher
//!
//! Dedicated task that consumes the document store's change feed and mirrors
//! every event into the [`ChannelConfigCache`]. When the feed errors or ends it
//! resubscribes after an exponential backoff.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::application::backoff::Backoff;
use crate::application::channel_config::ChannelConfigCache;

pub fn spawn_config_watcher(cache: ChannelConfigCache, backoff: Backoff) -> JoinHandle<()> {
    tokio::spawn(async move { run(cache, backoff).await })
}

async fn run(cache: ChannelConfigCache, mut backoff: Backoff) {
    let store = cache.store();
    loop {
        match store.watch().await {
            Ok(mut stream) => {
                tracing::info!("Subscribed to channel config change feed");
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            backoff.reset();
                            cache.apply_change(event).await;
                        }
                        Err(e) => {
                            tracing::warn!("Config change feed error: {}", e);
                            break;
                        }
                    }
                }
                tracing::warn!("Config change feed closed");
            }
            Err(e) => tracing::warn!("Failed to subscribe to config change feed: {}", e),
        }

        let delay = backoff.next_delay();
        tracing::info!(
            attempt = backoff.attempt(),
            "Resubscribing to config change feed in {:?}",
            delay
        );
        sleep(delay).await;
    }
}
