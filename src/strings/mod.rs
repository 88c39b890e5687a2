//! # Strings
//!
//! Chat replies and help text, kept in one place so wording stays consistent.

pub mod help;
pub mod messages;
