//! # Grid Room Server Library
//!
//! Authoritative server for shared 2D grid rooms. Clients connect over
//! WebSocket, join a room ("space"), and move one cell at a time; the server
//! validates every step and fans the result out to everyone else in the room.
//!
//! ## Module Organization
//!
//! ### Room Module (`room`)
//! The [`room::RoomRegistry`] maps room ids to their members in join order and
//! implements join, leave and exclude-sender broadcast. It is constructed
//! explicitly and shared by handle, never as a global.
//!
//! ### Session Module (`session`)
//! One [`session::Session`] per connection. It parses inbound frames, owns the
//! user's authoritative position and drives the Unjoined → Joined → Destroyed
//! state machine.
//!
//! ### Auth Module (`auth`)
//! Pluggable join-time authentication. The default admits anyone under a
//! random id; a token table can be configured instead.
//!
//! ### Network Module (`network`)
//! Accepts TCP connections, upgrades them to WebSocket and wires each one to a
//! session with its own outbound writer task.
//!
//! ## Movement Rules
//!
//! A move is accepted only when the requested cell is exactly one cardinal
//! step from the server-held position and inside the grid. Accepted moves are
//! acknowledged to the sender and broadcast to peers; rejected moves return
//! the unchanged position to the sender only.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::new(ServerConfig::new("127.0.0.1:3001")).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod network;
pub mod room;
pub mod session;
