//! # Interface Layer
//!
//! Entry points facing users: chat command handlers and the overlay delivery server.

pub mod commands;
pub mod server;
