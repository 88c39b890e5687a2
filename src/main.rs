#![recursion_limit = "256"]
//! # Main Entry Point
//!
//! Wires the bot together:
//! - Domain: Configuration and Types
//! - Infrastructure: Matrix, document stores, secrets, generation backends
//! - Application: Outbound queue, config cache, job queues, delivery, router
//! - Interface: Command handlers and the overlay delivery server
//!

mod application;
mod domain;
mod infrastructure;
mod interface;
mod strings;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use matrix_sdk::{
    Client,
    config::SyncSettings,
    room::Room,
    ruma::events::room::{
        member::{MembershipState, StrippedRoomMemberEvent, SyncRoomMemberEvent},
        message::{MessageType, SyncRoomMessageEvent},
    },
};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::application::backoff::Backoff;
use crate::application::channel_config::ChannelConfigCache;
use crate::application::delivery::{DeliveryHub, spawn_liveness_sweeper};
use crate::application::jobs::JobQueue;
use crate::application::outbound::OutboundQueue;
use crate::application::router::{EventRouter, Services};
use crate::application::watcher::spawn_config_watcher;
use crate::domain::config::{AppConfig, StoreBackend, StoreConfig};
use crate::domain::traits::{DocumentStore, SecretStore};
use crate::domain::types::JobKind;
use crate::infrastructure::document_store::FileDocumentStore;
use crate::infrastructure::matrix::{MatrixTransport, RoleMap, to_chat_event};
use crate::infrastructure::secrets::{ChainedSecretStore, EnvSecretStore, StaticSecretStore};

#[derive(Parser, Debug)]
#[command(name = "herald", about = "Chat-driven speech and music overlay bot")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "data/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Configuration
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    // 2. Logging Setup
    let log_dir = PathBuf::from(&config.system.log_dir);
    if !log_dir.exists() {
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
    }

    // Clear previous session log
    let log_path = log_dir.join("session.log");
    if log_path.exists() {
        let _ = fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(&log_dir, "session.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,matrix_sdk=warn,matrix_sdk_base=warn,matrix_sdk_crypto=error,ruma=warn,hyper=warn")
    });

    // Layer for file (Always active)
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::info!("Starting Herald...");

    // 3. Channel Configuration
    let store = open_store(&config.store).await?;
    let configs = ChannelConfigCache::new(store);
    let _watcher = spawn_config_watcher(configs.clone(), Backoff::default());

    // 4. Matrix Setup
    let client = Client::builder()
        .homeserver_url(&config.services.matrix.homeserver)
        .build()
        .await?;

    client
        .matrix_auth()
        .login_username(
            &config.services.matrix.username,
            &config.services.matrix.password,
        )
        .send()
        .await
        .context("Matrix login failed")?;

    tracing::info!("Logged in as {}", config.services.matrix.username);

    if let Some(name) = &config.services.matrix.display_name {
        if let Err(e) = client.account().set_display_name(Some(name.as_str())).await {
            tracing::warn!("Failed to set display name: {}", e);
        }
    }

    // 5. Core Components
    let transport = Arc::new(MatrixTransport::new(client.clone()));
    let outbound = OutboundQueue::from_config(transport, &config.outbound);

    let secrets: Arc<dyn SecretStore> = Arc::new(ChainedSecretStore::new(vec![
        Arc::new(StaticSecretStore::from_pairs(config.system.secrets.clone())),
        Arc::new(EnvSecretStore),
    ]));
    let delivery = DeliveryHub::new(
        secrets,
        &config.delivery.secret_name,
        config.channels.iter().cloned(),
    );
    let _sweeper = spawn_liveness_sweeper(
        delivery.clone(),
        Duration::from_secs(config.delivery.sweep_interval_secs.max(1)),
    );

    let api = infrastructure::generation::build(&config.generation)?;
    let queue = |kind, settings| {
        JobQueue::new(
            kind,
            settings,
            configs.clone(),
            api.clone(),
            outbound.clone(),
            delivery.clone(),
        )
    };
    let services = Services {
        speech: queue(JobKind::Speech, config.queues.speech.clone()),
        music: queue(JobKind::Music, config.queues.music.clone()),
        configs: configs.clone(),
        outbound: outbound.clone(),
        delivery: delivery.clone(),
    };
    let router = EventRouter::new(&config.system.command_prefix, services);

    // 6. Event Handlers
    let start_time = std::time::SystemTime::now();
    let roles = Arc::new(RoleMap::new(&config.system.admin, &config.system.moderators));
    let channels: Arc<HashSet<String>> = Arc::new(config.channels.iter().cloned().collect());

    client.add_event_handler(move |ev: SyncRoomMessageEvent, room: Room| {
        let router = router.clone();
        let roles = roles.clone();
        let channels = channels.clone();

        async move {
            let Some(original_msg) = ev.as_original() else {
                return;
            };
            // Ignore events older than start_time
            let event_time = std::time::UNIX_EPOCH
                + Duration::from_millis(ev.origin_server_ts().get().into());
            if event_time < start_time {
                return;
            }
            if original_msg.sender == room.own_user_id() {
                return;
            }
            let room_id = room.room_id().as_str();
            if !channels.contains(room_id) {
                return;
            }

            if let MessageType::Text(text_content) = &original_msg.content.msgtype {
                tracing::debug!("Received message from {}: {}", original_msg.sender, text_content.body);
                let event = to_chat_event(
                    &roles,
                    room_id,
                    original_msg.sender.as_str(),
                    &text_content.body,
                );
                let routed = router.route(event).await;
                tracing::debug!(channel = room_id, ?routed, "Message routed");
            }
        }
    });

    // Handle Invites
    client.add_event_handler(|ev: StrippedRoomMemberEvent, room: Room| async move {
        if ev.content.membership == MembershipState::Invite {
            if let Err(e) = room.join().await {
                tracing::warn!("Failed to join {}: {}", room.room_id(), e);
            }
        }
    });

    // Overlay delivery follows the bot's own membership in configured rooms
    let membership_delivery = delivery.clone();
    let membership_channels: Arc<HashSet<String>> = Arc::new(config.channels.iter().cloned().collect());
    client.add_event_handler(move |ev: SyncRoomMemberEvent, room: Room| {
        let delivery = membership_delivery.clone();
        let channels = membership_channels.clone();
        async move {
            if ev.state_key().as_str() != room.own_user_id().as_str() {
                return;
            }
            let room_id = room.room_id().as_str();
            match ev.membership() {
                MembershipState::Join if channels.contains(room_id) => {
                    delivery.activate(room_id).await;
                }
                MembershipState::Leave | MembershipState::Ban => {
                    delivery.deactivate(room_id).await;
                }
                _ => {}
            }
        }
    });

    // 7. Start Loops
    let sync_client = client.clone();
    let sync_handle = tokio::spawn(async move { sync_client.sync(SyncSettings::default()).await });
    let bind = config.server.bind.clone();
    let server_delivery = delivery.clone();
    let server_handle =
        tokio::spawn(async move { interface::server::serve(&bind, server_delivery).await });

    tokio::select! {
        res = sync_handle => match res {
            Ok(Ok(())) => tracing::warn!("Matrix sync ended"),
            Ok(Err(e)) => tracing::error!("Matrix sync failed: {}", e),
            Err(e) => tracing::error!("Matrix Sync Panic: {}", e),
        },
        res = server_handle => match res {
            Ok(Ok(())) => tracing::warn!("Delivery server ended"),
            Ok(Err(e)) => tracing::error!("Delivery server failed: {:#}", e),
            Err(e) => tracing::error!("Delivery server panic: {}", e),
        },
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutdown requested"),
    }

    let dropped = outbound.clear().await;
    tracing::info!(dropped, "Herald stopped");
    Ok(())
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::File => {
            let store = match &config.path {
                Some(path) => FileDocumentStore::open(path)
                    .with_context(|| format!("Failed to open channel store {path}"))?,
                None => FileDocumentStore::in_memory(),
            };
            Ok(Arc::new(store))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("store.redis_url is required for the redis backend")?;
            let store =
                infrastructure::redis_store::RedisDocumentStore::connect(url, &config.prefix)
                    .await
                    .context("Failed to connect to Redis")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => {
            anyhow::bail!("the redis store backend requires building with the `redis` feature")
        }
    }
}
