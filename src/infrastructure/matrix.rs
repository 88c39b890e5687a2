//! # Matrix Transport Adapter
//!
//! Implements the `ChatTransport` trait for the Matrix protocol using the `matrix_sdk`.
//! Channels are Matrix room ids; inbound messages are turned into [`ChatEvent`]s
//! by [`to_chat_event`].

use crate::domain::traits::ChatTransport;
use crate::domain::types::{ChatEvent, PermissionLevel};
use async_trait::async_trait;
use matrix_sdk::Client;
use matrix_sdk::ruma::RoomId;
use matrix_sdk::ruma::events::room::message::RoomMessageEventContent;
use std::collections::HashSet;

#[derive(Clone)]
pub struct MatrixTransport {
    client: Client,
}

impl MatrixTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatTransport for MatrixTransport {
    async fn send(&self, channel: &str, text: &str) -> Result<(), String> {
        let room_id = <&RoomId>::try_from(channel).map_err(|e| e.to_string())?;
        let room = self
            .client
            .get_room(room_id)
            .ok_or_else(|| format!("not joined to room {channel}"))?;

        tracing::info!("Bot sending message to {}: {}", channel, text);
        room.send(RoomMessageEventContent::text_markdown(text))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Chat roles derived from the config's `admin` and `moderators` lists.
#[derive(Debug, Clone, Default)]
pub struct RoleMap {
    broadcasters: HashSet<String>,
    moderators: HashSet<String>,
}

impl RoleMap {
    pub fn new(admins: &[String], moderators: &[String]) -> Self {
        let normalize = |users: &[String]| users.iter().map(|u| u.to_lowercase()).collect();
        Self {
            broadcasters: normalize(admins),
            moderators: normalize(moderators),
        }
    }

    pub fn permission(&self, user: &str) -> PermissionLevel {
        let user = user.to_lowercase();
        if self.broadcasters.contains(&user) {
            PermissionLevel::Broadcaster
        } else if self.moderators.contains(&user) {
            PermissionLevel::Moderator
        } else {
            PermissionLevel::Everyone
        }
    }
}

/// Build the router input for a text message. Matrix carries no bits, so
/// ambient bits triggers never fire on this transport.
pub fn to_chat_event(roles: &RoleMap, room_id: &str, sender: &str, body: &str) -> ChatEvent {
    ChatEvent {
        channel: room_id.to_string(),
        user: sender.to_string(),
        text: body.to_string(),
        permission: roles.permission(sender),
        bits: 0,
    }
}
