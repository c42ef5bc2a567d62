//! Join-time authentication.
//!
//! Every `join` passes through an [`Authenticator`] before the session is
//! admitted to a room. The default [`AnonymousAuthenticator`] admits anyone
//! under a fresh random id; [`TokenAuthenticator`] only admits holders of a
//! configured token.

use crate::error::{Result, ServerError};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use thiserror::Error;

const USER_ID_LEN: usize = 10;

/// Who a session is once admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("unknown token")]
    UnknownToken,
}

pub trait Authenticator: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    fn authenticate(
        &self,
        space_id: &str,
        token: Option<&str>,
    ) -> std::result::Result<Identity, AuthError>;
}

/// Accepts every join and mints a random user id. Tokens are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn name(&self) -> &'static str {
        "anonymous"
    }

    fn authenticate(
        &self,
        _space_id: &str,
        _token: Option<&str>,
    ) -> std::result::Result<Identity, AuthError> {
        Ok(Identity {
            user_id: random_user_id(),
        })
    }
}

/// Admits only tokens from a static grant table, each bound to a user id.
#[derive(Debug, Default, Clone)]
pub struct TokenAuthenticator {
    grants: HashMap<String, String>,
}

impl TokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.grants.insert(token.into(), user_id.into());
        self
    }

    /// Builds the table from `TOKEN=USER` strings as given on the command line.
    pub fn from_grants<I, S>(grants: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut authenticator = Self::new();
        for grant in grants {
            let grant = grant.as_ref();
            match grant.split_once('=') {
                Some((token, user_id)) if !token.is_empty() && !user_id.is_empty() => {
                    authenticator = authenticator.grant(token, user_id);
                }
                _ => {
                    return Err(ServerError::Config(format!(
                        "grant '{}' is not of the form TOKEN=USER",
                        grant
                    )))
                }
            }
        }
        Ok(authenticator)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl Authenticator for TokenAuthenticator {
    fn name(&self) -> &'static str {
        "token"
    }

    fn authenticate(
        &self,
        _space_id: &str,
        token: Option<&str>,
    ) -> std::result::Result<Identity, AuthError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(AuthError::MissingToken)?;
        self.grants
            .get(token)
            .map(|user_id| Identity {
                user_id: user_id.clone(),
            })
            .ok_or(AuthError::UnknownToken)
    }
}

pub fn random_user_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(USER_ID_LEN)
        .map(char::from)
        .collect()
}
