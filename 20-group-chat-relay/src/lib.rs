//! TCP group chat relay.
//!
//! A relay server accepts any number of clients and forwards every frame it
//! receives to all other connected clients. Frames are opaque text; clients
//! tag them as `[topic] [sender] body` and keep only their own topic.
//!
//! - [`frame`] is the 2-byte length-prefixed UTF-8 wire format used in both directions.
//! - [`session`] wraps one accepted connection with a write lock and an idempotent close.
//! - [`registry`] is the set of live sessions.
//! - [`router`] serializes broadcasts under one lock so every client sees the same order.
//! - [`server`] runs the accept loop and one reader task per connection.
//! - [`client`] and [`topic`] are the client side: connection, read loop and topic filter.
//! - [`cli`], [`config`] and [`terminal`] back the `group_chat_relay` binary.
//!
//! Integration tests drive the relay over real sockets on `127.0.0.1:0`.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod terminal;
pub mod topic;
