//! Server settings shared by every session.

use crate::auth::{AnonymousAuthenticator, Authenticator};
use crate::error::{Result, ServerError};
use shared::{DEFAULT_SPACE_ID, GRID_SIZE, MAX_GRID_SIZE};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,
    /// Side length of every room's grid.
    pub grid_size: u32,
    /// Room joined when a client omits `spaceId`.
    pub default_space: String,
    /// Decides who may join and under which user id.
    pub authenticator: Arc<dyn Authenticator>,
}

impl ServerConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Rejects grids with no cells or with coordinates that would not fit a
    /// [`shared::Position`].
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_GRID_SIZE).contains(&self.grid_size) {
            return Err(ServerError::Config(format!(
                "grid size must be between 1 and {}, got {}",
                MAX_GRID_SIZE, self.grid_size
            )));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3001".to_string(),
            grid_size: GRID_SIZE,
            default_space: DEFAULT_SPACE_ID.to_string(),
            authenticator: Arc::new(AnonymousAuthenticator),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("grid_size", &self.grid_size)
            .field("default_space", &self.default_space)
            .field("authenticator", &self.authenticator.name())
            .finish()
    }
}
