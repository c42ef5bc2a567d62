//! Per-connection session state machine.
//!
//! A session starts `Unjoined`, becomes `Joined` after a successful `join`,
//! and ends `Destroyed` when its connection goes away. Only a joined session
//! may move, and every move is checked against the position the server holds,
//! never against anything the client claims.

use crate::config::ServerConfig;
use crate::room::{Member, Outbound, RoomRegistry, SessionId};
use log::{debug, info, warn};
use rand::Rng;
use shared::{
    now_millis, validate_move, ClientMessage, JoinPayload, MoveIntent, Position, ServerMessage,
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Joined {
        room_id: String,
        user_id: String,
        position: Position,
    },
    Destroyed,
}

pub struct Session {
    id: SessionId,
    state: SessionState,
    outbound: Outbound,
    registry: Arc<RoomRegistry>,
    config: Arc<ServerConfig>,
}

impl Session {
    pub fn new(
        id: SessionId,
        outbound: Outbound,
        registry: Arc<RoomRegistry>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            id,
            state: SessionState::Unjoined,
            outbound,
            registry,
            config,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn position(&self) -> Option<Position> {
        match &self.state {
            SessionState::Joined { position, .. } => Some(*position),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { user_id, .. } => Some(user_id),
            _ => None,
        }
    }

    pub fn room_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { room_id, .. } => Some(room_id),
            _ => None,
        }
    }

    /// Handles one inbound text frame. Malformed frames are logged and dropped.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(Some(message)) => self.handle_message(message).await,
            Ok(None) => debug!("Session {} sent a message of unknown type", self.id),
            Err(e) => warn!("Session {} dropped frame: {}", self.id, e),
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Join(payload) => self.join(payload).await,
            ClientMessage::Move(intent) => self.apply_move(intent).await,
        }
    }

    async fn join(&mut self, payload: JoinPayload) {
        match self.state {
            SessionState::Unjoined => {}
            SessionState::Joined { ref room_id, .. } => {
                warn!(
                    "Session {} is already in room '{}', ignoring join",
                    self.id, room_id
                );
                return;
            }
            SessionState::Destroyed => return,
        }

        let room_id = payload
            .space_id()
            .unwrap_or(self.config.default_space.as_str())
            .to_string();

        let identity = match self
            .config
            .authenticator
            .authenticate(&room_id, payload.token.as_deref())
        {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Session {} refused entry to '{}': {}", self.id, room_id, e);
                self.send(ServerMessage::JoinRejected {
                    reason: e.to_string(),
                });
                return;
            }
        };

        let spawn = random_spawn(self.config.grid_size);
        let user_id = identity.user_id;
        let member = Member::new(self.id, user_id.clone(), spawn, self.outbound.clone());

        let notice = ServerMessage::UserJoined {
            user_id: user_id.clone(),
            x: spawn.x,
            y: spawn.y,
        };
        let roster = self
            .registry
            .join(
                &room_id,
                member,
                |users| ServerMessage::SpaceJoined {
                    spawn,
                    user_id: user_id.clone(),
                    users: users.to_vec(),
                },
                &notice,
            )
            .await;

        info!(
            "Session {} joined '{}' as {} at ({}, {}) with {} other(s) present",
            self.id,
            room_id,
            user_id,
            spawn.x,
            spawn.y,
            roster.len()
        );

        self.state = SessionState::Joined {
            room_id,
            user_id,
            position: spawn,
        };
    }

    async fn apply_move(&mut self, intent: MoveIntent) {
        let (room_id, user_id, current) = match &self.state {
            SessionState::Joined {
                room_id,
                user_id,
                position,
            } => (room_id.clone(), user_id.clone(), *position),
            _ => {
                debug!("Session {} tried to move before joining", self.id);
                return;
            }
        };

        let grid_size = self.config.grid_size;
        let Some(target) = validate_move(current, intent.x, intent.y, grid_size) else {
            debug!(
                "Session {} move ({}, {}) -> ({}, {}) rejected, seq {}",
                self.id, current.x, current.y, intent.x, intent.y, intent.sequence
            );
            self.send(ServerMessage::MovementRejected {
                x: current.x,
                y: current.y,
            });
            return;
        };

        if let SessionState::Joined { position, .. } = &mut self.state {
            *position = target;
        }

        self.send(ServerMessage::MoveAck {
            sequence: intent.sequence,
            x: target.x,
            y: target.y,
            success: true,
            // A zero timestamp counts as absent.
            timestamp: intent
                .timestamp
                .filter(|&t| t != 0)
                .unwrap_or_else(now_millis),
        });

        self.registry
            .relocate(
                &room_id,
                self.id,
                target,
                &ServerMessage::Movement {
                    user_id,
                    x: target.x,
                    y: target.y,
                    sequence: intent.sequence,
                },
            )
            .await;
    }

    /// Tears the session down, telling the room it left. Safe to call more
    /// than once; only the first call has any effect.
    pub async fn destroy(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Destroyed);
        if let SessionState::Joined {
            room_id, user_id, ..
        } = previous
        {
            let farewell = ServerMessage::UserLeft {
                user_id: user_id.clone(),
            };
            self.registry
                .leave(&room_id, self.id, Some(&farewell))
                .await;
            info!("Session {} ({}) left '{}'", self.id, user_id, room_id);
        }
    }

    fn send(&self, message: ServerMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Session {} outbound queue is closed", self.id);
        }
    }
}

/// Uniformly random cell. Occupied cells are not avoided.
fn random_spawn(grid_size: u32) -> Position {
    let n = i32::try_from(grid_size).unwrap_or(i32::MAX).max(1);
    let mut rng = rand::thread_rng();
    Position::new(rng.gen_range(0..n), rng.gen_range(0..n))
}
