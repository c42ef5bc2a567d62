//! Client-side prediction and reconciliation for grid movement.
//!
//! Moves are shown immediately and remembered by sequence number until the
//! server answers. An acknowledgment retires one pending move and adopts the
//! server's position; a rejection throws away every pending move and snaps to
//! the position the server reports.

use log::debug;
use shared::{ClientMessage, MoveIntent, Occupant, Position, ServerMessage};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn apply(self, from: Position) -> Position {
        match self {
            Direction::Up => Position::new(from.x, from.y - 1),
            Direction::Down => Position::new(from.x, from.y + 1),
            Direction::Left => Position::new(from.x - 1, from.y),
            Direction::Right => Position::new(from.x + 1, from.y),
        }
    }
}

/// Locally predicted movement awaiting server confirmation.
#[derive(Debug, Clone)]
pub struct MovementState {
    sequence: i64,
    pending: BTreeMap<i64, Position>,
    predicted: Position,
}

impl MovementState {
    pub fn new(spawn: Position) -> Self {
        Self {
            sequence: 0,
            pending: BTreeMap::new(),
            predicted: spawn,
        }
    }

    pub fn predicted(&self) -> Position {
        self.predicted
    }

    pub fn pending(&self) -> &BTreeMap<i64, Position> {
        &self.pending
    }

    /// Records `target` as the new predicted position and returns the intent
    /// to send. Targets outside the grid are not predicted at all.
    pub fn predict(&mut self, target: Position, grid_size: u32, timestamp: u64) -> Option<MoveIntent> {
        if !target.in_bounds(grid_size) {
            return None;
        }

        self.sequence += 1;
        self.pending.insert(self.sequence, target);
        self.predicted = target;

        Some(MoveIntent {
            x: target.x.into(),
            y: target.y.into(),
            user_id: None,
            sequence: self.sequence,
            timestamp: Some(timestamp),
        })
    }

    pub fn acknowledge(&mut self, sequence: i64, position: Position) {
        self.pending.remove(&sequence);
        self.predicted = position;
    }

    pub fn reject(&mut self, position: Position) {
        self.pending.clear();
        self.predicted = position;
    }
}

/// Everything a client knows about its room.
#[derive(Debug)]
pub struct ClientWorld {
    grid_size: u32,
    user_id: Option<String>,
    movement: Option<MovementState>,
    peers: HashMap<String, Position>,
}

impl ClientWorld {
    pub fn new(grid_size: u32) -> Self {
        Self {
            grid_size,
            user_id: None,
            movement: None,
            peers: HashMap::new(),
        }
    }

    pub fn is_joined(&self) -> bool {
        self.movement.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Where this client currently draws itself.
    pub fn position(&self) -> Option<Position> {
        self.movement.as_ref().map(MovementState::predicted)
    }

    pub fn movement(&self) -> Option<&MovementState> {
        self.movement.as_ref()
    }

    pub fn peers(&self) -> &HashMap<String, Position> {
        &self.peers
    }

    /// Predicts one step in `direction` and returns the message to send, if
    /// the client is joined and the step stays on the grid.
    pub fn request_move(&mut self, direction: Direction, timestamp: u64) -> Option<ClientMessage> {
        let movement = self.movement.as_mut()?;
        let target = direction.apply(movement.predicted());
        movement
            .predict(target, self.grid_size, timestamp)
            .map(ClientMessage::Move)
    }

    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::SpaceJoined {
                spawn,
                user_id,
                users,
            } => {
                self.user_id = Some(user_id.clone());
                self.movement = Some(MovementState::new(*spawn));
                self.peers = users
                    .iter()
                    .map(|Occupant { user_id, x, y }| (user_id.clone(), Position::new(*x, *y)))
                    .collect();
            }
            ServerMessage::UserJoined { user_id, x, y } => {
                self.peers.insert(user_id.clone(), Position::new(*x, *y));
            }
            ServerMessage::Movement { user_id, x, y, .. } => {
                if let Some(peer) = self.peers.get_mut(user_id) {
                    *peer = Position::new(*x, *y);
                } else {
                    debug!("Movement for unknown user {}", user_id);
                }
            }
            ServerMessage::MoveAck { sequence, x, y, .. } => {
                if let Some(movement) = self.movement.as_mut() {
                    movement.acknowledge(*sequence, Position::new(*x, *y));
                }
            }
            ServerMessage::MovementRejected { x, y } => {
                if let Some(movement) = self.movement.as_mut() {
                    movement.reject(Position::new(*x, *y));
                }
            }
            ServerMessage::UserLeft { user_id } => {
                self.peers.remove(user_id);
            }
            ServerMessage::JoinRejected { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::GRID_SIZE;

    fn joined_world(spawn: Position) -> ClientWorld {
        let mut world = ClientWorld::new(GRID_SIZE);
        world.apply(&ServerMessage::SpaceJoined {
            spawn,
            user_id: "me".to_string(),
            users: vec![Occupant {
                user_id: "peer".to_string(),
                x: 7,
                y: 7,
            }],
        });
        world
    }

    #[test]
    fn test_direction_offsets() {
        let origin = Position::new(3, 3);
        assert_eq!(Direction::Up.apply(origin), Position::new(3, 2));
        assert_eq!(Direction::Down.apply(origin), Position::new(3, 4));
        assert_eq!(Direction::Left.apply(origin), Position::new(2, 3));
        assert_eq!(Direction::Right.apply(origin), Position::new(4, 3));
    }

    #[test]
    fn test_predict_records_pending_move() {
        let mut state = MovementState::new(Position::new(3, 3));
        let intent = state.predict(Position::new(3, 4), GRID_SIZE, 99).unwrap();

        assert_eq!(intent.sequence, 1);
        assert_eq!((intent.x, intent.y), (3, 4));
        assert_eq!(intent.timestamp, Some(99));
        assert_eq!(state.predicted(), Position::new(3, 4));
        assert_eq!(state.pending().get(&1), Some(&Position::new(3, 4)));
    }

    #[test]
    fn test_predict_refuses_off_grid_target() {
        let mut state = MovementState::new(Position::new(0, 0));
        assert!(state.predict(Position::new(-1, 0), GRID_SIZE, 0).is_none());
        assert!(state.pending().is_empty());
        assert_eq!(state.predicted(), Position::new(0, 0));
    }

    #[test]
    fn test_ack_retires_only_matching_sequence() {
        let mut state = MovementState::new(Position::new(3, 3));
        state.predict(Position::new(3, 4), GRID_SIZE, 0);
        state.predict(Position::new(3, 5), GRID_SIZE, 0);

        state.acknowledge(1, Position::new(3, 4));

        assert_eq!(state.pending().len(), 1);
        assert!(state.pending().contains_key(&2));
        assert_eq!(state.predicted(), Position::new(3, 4));
    }

    #[test]
    fn test_rejection_clears_everything() {
        let mut state = MovementState::new(Position::new(3, 3));
        state.predict(Position::new(3, 4), GRID_SIZE, 0);
        state.predict(Position::new(3, 5), GRID_SIZE, 0);

        state.reject(Position::new(3, 3));

        assert!(state.pending().is_empty());
        assert_eq!(state.predicted(), Position::new(3, 3));
    }

    #[test]
    fn test_world_tracks_roster() {
        let mut world = joined_world(Position::new(1, 1));
        assert_eq!(world.user_id(), Some("me"));
        assert_eq!(world.peers().get("peer"), Some(&Position::new(7, 7)));

        world.apply(&ServerMessage::UserJoined {
            user_id: "other".to_string(),
            x: 2,
            y: 2,
        });
        world.apply(&ServerMessage::Movement {
            user_id: "peer".to_string(),
            x: 6,
            y: 7,
            sequence: 4,
        });
        world.apply(&ServerMessage::UserLeft {
            user_id: "other".to_string(),
        });

        assert_eq!(world.peers().len(), 1);
        assert_eq!(world.peers().get("peer"), Some(&Position::new(6, 7)));
    }

    #[test]
    fn test_movement_for_unknown_user_ignored() {
        let mut world = joined_world(Position::new(1, 1));
        world.apply(&ServerMessage::Movement {
            user_id: "ghost".to_string(),
            x: 0,
            y: 0,
            sequence: 1,
        });
        assert!(!world.peers().contains_key("ghost"));
    }

    #[test]
    fn test_request_move_requires_join() {
        let mut world = ClientWorld::new(GRID_SIZE);
        assert!(world.request_move(Direction::Right, 0).is_none());
    }

    #[test]
    fn test_request_move_then_reject_snaps_back() {
        let mut world = joined_world(Position::new(0, 0));

        assert!(world.request_move(Direction::Up, 0).is_none());
        let msg = world.request_move(Direction::Right, 0).unwrap();
        assert!(matches!(msg, ClientMessage::Move(MoveIntent { x: 1, y: 0, .. })));
        assert_eq!(world.position(), Some(Position::new(1, 0)));

        world.apply(&ServerMessage::MovementRejected { x: 0, y: 0 });
        assert_eq!(world.position(), Some(Position::new(0, 0)));
        assert!(world.movement().unwrap().pending().is_empty());
    }
}
