#![allow(clippy::new_without_default)]

//! Game layer on top of the ferrite runtime: configuration, wire messages,
//! the player object and the server bootstrap.

pub mod config;
pub mod messages;
pub mod player;
pub mod server;
