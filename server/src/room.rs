//! Room registry shared by all sessions of a server.
//!
//! A room is created on first join and pruned once its last member leaves.
//! Every room guards its member list with its own lock, so broadcasts in
//! different rooms never contend. Joining and leaving additionally hold the
//! registry-wide write lock, which keeps pruning from racing a concurrent
//! join into the same room.

use log::debug;
use shared::{Occupant, Position, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Server-internal connection identifier.
pub type SessionId = u64;

/// Queue feeding one connection's socket writer.
pub type Outbound = mpsc::UnboundedSender<ServerMessage>;

/// A joined session as tracked by its room.
#[derive(Debug, Clone)]
pub struct Member {
    pub session_id: SessionId,
    pub user_id: String,
    pub position: Position,
    outbound: Outbound,
}

impl Member {
    pub fn new(
        session_id: SessionId,
        user_id: String,
        position: Position,
        outbound: Outbound,
    ) -> Self {
        Self {
            session_id,
            user_id,
            position,
            outbound,
        }
    }

    fn occupant(&self) -> Occupant {
        Occupant {
            user_id: self.user_id.clone(),
            x: self.position.x,
            y: self.position.y,
        }
    }

    /// Best-effort delivery. Returns false if the connection is already gone.
    fn deliver(&self, message: ServerMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}

/// Members in join order.
#[derive(Debug, Default)]
struct Room {
    members: Vec<Member>,
}

impl Room {
    fn roster(&self, exclude: Option<SessionId>) -> Vec<Occupant> {
        self.members
            .iter()
            .filter(|m| Some(m.session_id) != exclude)
            .map(Member::occupant)
            .collect()
    }

    fn broadcast(&self, message: &ServerMessage, exclude: Option<SessionId>) -> usize {
        self.members
            .iter()
            .filter(|m| Some(m.session_id) != exclude)
            .filter(|m| m.deliver(message.clone()))
            .count()
    }
}

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<Room>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `member` to `room_id`, creating the room if needed.
    ///
    /// `greeting` is built from the roster as it stood before the join and is
    /// delivered to the new member, then `notice` goes to everyone already in
    /// the room. Both happen while the room is locked, so a concurrent joiner
    /// either finds this member in its roster or hears the notice, never both.
    /// A session already present in the room is replaced in place rather than
    /// duplicated.
    ///
    /// Returns that pre-join roster.
    pub async fn join<F>(
        &self,
        room_id: &str,
        member: Member,
        greeting: F,
        notice: &ServerMessage,
    ) -> Vec<Occupant>
    where
        F: FnOnce(&[Occupant]) -> ServerMessage,
    {
        let mut rooms = self.rooms.write().await;
        let room = Arc::clone(rooms.entry(room_id.to_string()).or_default());
        let mut room = room.lock().await;

        let roster = room.roster(Some(member.session_id));
        member.deliver(greeting(&roster));
        room.broadcast(notice, Some(member.session_id));

        match room
            .members
            .iter()
            .position(|m| m.session_id == member.session_id)
        {
            Some(index) => room.members[index] = member,
            None => room.members.push(member),
        }

        debug!(
            "Room '{}' now has {} member(s)",
            room_id,
            room.members.len()
        );
        roster
    }

    /// Removes `session_id` from `room_id`.
    ///
    /// If the session was present, `farewell` is broadcast to the members that
    /// remain. Returns false (and sends nothing) when the session was not a
    /// member, so repeated calls are harmless. Empty rooms are dropped.
    pub async fn leave(
        &self,
        room_id: &str,
        session_id: SessionId,
        farewell: Option<&ServerMessage>,
    ) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).cloned() else {
            return false;
        };

        let mut room_guard = room.lock().await;
        let before = room_guard.members.len();
        room_guard.members.retain(|m| m.session_id != session_id);
        let removed = room_guard.members.len() != before;

        if removed {
            if let Some(message) = farewell {
                room_guard.broadcast(message, None);
            }
        }

        if room_guard.members.is_empty() {
            drop(room_guard);
            rooms.remove(room_id);
            debug!("Room '{}' is empty and was removed", room_id);
        }

        removed
    }

    /// Sends `message` to every member of `room_id` except `exclude`, in join
    /// order. Returns how many members it was handed to.
    pub async fn broadcast(
        &self,
        room_id: &str,
        message: &ServerMessage,
        exclude: Option<SessionId>,
    ) -> usize {
        let Some(room) = self.room(room_id).await else {
            return 0;
        };
        let room = room.lock().await;
        room.broadcast(message, exclude)
    }

    /// Records a committed position for `session_id` and tells the rest of the
    /// room about it in one step.
    ///
    /// Returns `None` if the session is not a member of the room.
    pub async fn relocate(
        &self,
        room_id: &str,
        session_id: SessionId,
        position: Position,
        notice: &ServerMessage,
    ) -> Option<usize> {
        let room = self.room(room_id).await?;
        let mut room = room.lock().await;

        let member = room
            .members
            .iter_mut()
            .find(|m| m.session_id == session_id)?;
        member.position = position;

        Some(room.broadcast(notice, Some(session_id)))
    }

    /// Current occupants of `room_id`, optionally leaving one session out.
    pub async fn roster(&self, room_id: &str, exclude: Option<SessionId>) -> Vec<Occupant> {
        let Some(room) = self.room(room_id).await else {
            return Vec::new();
        };
        let room = room.lock().await;
        room.roster(exclude)
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        let Some(room) = self.room(room_id).await else {
            return 0;
        };
        let room = room.lock().await;
        room.members.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    async fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.rooms.read().await.get(room_id).cloned()
    }
}
