//! # Grid Room Client Library
//!
//! Headless client for the grid room server.
//!
//! - `network`: WebSocket connection that speaks the room protocol.
//! - `prediction`: optimistic local movement keyed by sequence number, plus
//!   the roster of other users, reconciled against server acknowledgments and
//!   rejections.

pub mod network;
pub mod prediction;
