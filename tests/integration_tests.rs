//! Integration tests for the room server
//!
//! These tests run a real server on an ephemeral port and talk to it over
//! real WebSocket connections.

use client::network::Connection;
use client::prediction::{ClientWorld, Direction};
use futures_util::{SinkExt, StreamExt};
use server::auth::TokenAuthenticator;
use server::config::ServerConfig;
use server::network::Server;
use server::room::RoomRegistry;
use shared::{ClientMessage, MoveIntent, Occupant, Position, ServerMessage, GRID_SIZE};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

async fn start_server(config: ServerConfig) -> (String, Arc<RoomRegistry>) {
    let server = Server::new(config).await.expect("server should bind");
    let addr = server.local_addr().unwrap();
    let registry = server.registry();
    tokio::spawn(server.run());
    (format!("ws://{}", addr), registry)
}

async fn start_default_server() -> (String, Arc<RoomRegistry>) {
    start_server(ServerConfig::new("127.0.0.1:0")).await
}

async fn recv(connection: &mut Connection) -> ServerMessage {
    timeout(RECV_TIMEOUT, connection.recv())
        .await
        .expect("timed out waiting for server message")
        .expect("connection failed")
}

async fn recv_raw<S>(ws: &mut S) -> ServerMessage
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let frame = timeout(RECV_TIMEOUT, ws.next())
        .await
        .expect("timed out waiting for server message")
        .expect("stream ended")
        .expect("connection failed");
    ServerMessage::parse(&frame.into_text().unwrap()).expect("server sent malformed frame")
}

async fn assert_silent(connection: &mut Connection) {
    let result = timeout(Duration::from_millis(150), connection.recv()).await;
    assert!(result.is_err(), "unexpected message: {:?}", result);
}

struct Joined {
    connection: Connection,
    user_id: String,
    spawn: Position,
    users: Vec<Occupant>,
}

async fn join(url: &str, space_id: Option<&str>) -> Joined {
    let mut connection = Connection::connect(url).await.expect("connect");
    connection.join(space_id, None).await.unwrap();

    match recv(&mut connection).await {
        ServerMessage::SpaceJoined {
            spawn,
            user_id,
            users,
        } => Joined {
            connection,
            user_id,
            spawn,
            users,
        },
        other => panic!("expected space-joined, got {:?}", other),
    }
}

fn step_from(p: Position) -> Position {
    if p.x + 1 < GRID_SIZE as i32 {
        Position::new(p.x + 1, p.y)
    } else {
        Position::new(p.x - 1, p.y)
    }
}

fn move_msg(target: Position, sequence: i64) -> ClientMessage {
    ClientMessage::Move(MoveIntent {
        x: target.x.into(),
        y: target.y.into(),
        user_id: None,
        sequence,
        timestamp: Some(1234),
    })
}

async fn wait_for_members(registry: &RoomRegistry, room: &str, expected: usize) {
    for _ in 0..100 {
        if registry.member_count(room).await == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "room '{}' never reached {} member(s), has {}",
        room,
        expected,
        registry.member_count(room).await
    );
}

/// JOIN AND ROSTER TESTS
mod join_tests {
    use super::*;

    /// Tests that clients joining without a space share the default room and see each other
    #[tokio::test]
    async fn default_space_is_shared() {
        let (url, registry) = start_default_server().await;

        let mut alice = join(&url, None).await;
        assert!(alice.spawn.in_bounds(GRID_SIZE));
        assert!(alice.users.is_empty());

        let bob = join(&url, None).await;
        assert!(bob.spawn.in_bounds(GRID_SIZE));
        assert_eq!(
            bob.users,
            vec![Occupant {
                user_id: alice.user_id.clone(),
                x: alice.spawn.x,
                y: alice.spawn.y,
            }]
        );
        assert!(bob.users.iter().all(|u| u.user_id != bob.user_id));

        assert_eq!(
            recv(&mut alice.connection).await,
            ServerMessage::UserJoined {
                user_id: bob.user_id.clone(),
                x: bob.spawn.x,
                y: bob.spawn.y,
            }
        );
        assert_eq!(registry.member_count("default-space").await, 2);
    }

    /// Tests that rooms with different names are isolated from each other
    #[tokio::test]
    async fn named_spaces_do_not_see_each_other() {
        let (url, registry) = start_default_server().await;

        let mut alice = join(&url, Some("red")).await;
        let bob = join(&url, Some("blue")).await;

        assert!(bob.users.is_empty());
        assert_silent(&mut alice.connection).await;
        assert_eq!(registry.room_count().await, 2);
    }

    /// Tests that token authentication rejects unknown tokens and admits granted users
    #[tokio::test]
    async fn token_required_when_configured() {
        let config = ServerConfig::new("127.0.0.1:0")
            .with_authenticator(Arc::new(TokenAuthenticator::new().grant("letmein", "alice")));
        let (url, registry) = start_server(config).await;

        let mut connection = Connection::connect(&url).await.unwrap();
        connection.join(None, Some("wrong")).await.unwrap();
        assert!(matches!(
            recv(&mut connection).await,
            ServerMessage::JoinRejected { .. }
        ));
        assert_eq!(registry.room_count().await, 0);

        connection.join(None, Some("letmein")).await.unwrap();
        match recv(&mut connection).await {
            ServerMessage::SpaceJoined { user_id, .. } => assert_eq!(user_id, "alice"),
            other => panic!("expected space-joined, got {:?}", other),
        }
    }
}

/// MOVEMENT TESTS
mod movement_tests {
    use super::*;

    /// Tests that a legal step is acknowledged to the mover and broadcast to all peers
    #[tokio::test]
    async fn accepted_move_acks_sender_and_reaches_every_peer() {
        let (url, _registry) = start_default_server().await;

        let mut alice = join(&url, None).await;
        let mut bob = join(&url, None).await;
        recv(&mut alice.connection).await; // bob joined
        let mut carol = join(&url, None).await;
        recv(&mut alice.connection).await; // carol joined
        recv(&mut bob.connection).await; // carol joined

        let target = step_from(alice.spawn);
        alice.connection.send(&move_msg(target, 41)).await.unwrap();

        assert_eq!(
            recv(&mut alice.connection).await,
            ServerMessage::MoveAck {
                sequence: 41,
                x: target.x,
                y: target.y,
                success: true,
                timestamp: 1234,
            }
        );

        let expected = ServerMessage::Movement {
            user_id: alice.user_id.clone(),
            x: target.x,
            y: target.y,
            sequence: 41,
        };
        assert_eq!(recv(&mut bob.connection).await, expected);
        assert_eq!(recv(&mut carol.connection).await, expected);
        assert_silent(&mut alice.connection).await;
    }

    /// Tests that a zero timestamp and a null sequence fall back to server defaults
    #[tokio::test]
    async fn null_sequence_and_zero_timestamp_use_defaults() {
        let (url, _registry) = start_default_server().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        ws.send(Message::Text(r#"{"type":"join","payload":{}}"#.to_string()))
            .await
            .unwrap();
        let spawn = match recv_raw(&mut ws).await {
            ServerMessage::SpaceJoined { spawn, .. } => spawn,
            other => panic!("expected space-joined, got {:?}", other),
        };

        let target = step_from(spawn);
        let before = shared::now_millis();
        ws.send(Message::Text(format!(
            r#"{{"type":"move","payload":{{"x":{},"y":{},"sequence":null,"timestamp":0}}}}"#,
            target.x, target.y
        )))
        .await
        .unwrap();

        match recv_raw(&mut ws).await {
            ServerMessage::MoveAck {
                sequence,
                timestamp,
                success,
                ..
            } => {
                assert!(success);
                assert_eq!(sequence, 0);
                assert!(timestamp >= before);
            }
            other => panic!("expected move-ack, got {:?}", other),
        }
    }

    /// Tests that an illegal step is reported only to the mover
    #[tokio::test]
    async fn rejected_move_is_private() {
        let (url, _registry) = start_default_server().await;

        let mut alice = join(&url, None).await;
        let mut bob = join(&url, None).await;
        recv(&mut alice.connection).await;

        let far = Position::new(alice.spawn.x + 2, alice.spawn.y);
        alice.connection.send(&move_msg(far, 1)).await.unwrap();
        assert_eq!(
            recv(&mut alice.connection).await,
            ServerMessage::MovementRejected {
                x: alice.spawn.x,
                y: alice.spawn.y,
            }
        );

        // The next thing bob hears about is the legal move, not the rejected one.
        let target = step_from(alice.spawn);
        alice.connection.send(&move_msg(target, 2)).await.unwrap();
        match recv(&mut bob.connection).await {
            ServerMessage::Movement { sequence, .. } => assert_eq!(sequence, 2),
            other => panic!("expected movement, got {:?}", other),
        }
    }

    /// Tests client-side prediction against real server acknowledgments
    #[tokio::test]
    async fn predicted_walk_converges_with_server() {
        let (url, _registry) = start_default_server().await;
        let mut alice = join(&url, None).await;

        let mut world = ClientWorld::new(GRID_SIZE);
        world.apply(&ServerMessage::SpaceJoined {
            spawn: alice.spawn,
            user_id: alice.user_id.clone(),
            users: alice.users.clone(),
        });

        for direction in [Direction::Right, Direction::Down, Direction::Left, Direction::Up] {
            let Some(request) = world.request_move(direction, 0) else {
                continue;
            };
            alice.connection.send(&request).await.unwrap();
            let reply = recv(&mut alice.connection).await;
            assert!(matches!(reply, ServerMessage::MoveAck { .. }));
            world.apply(&reply);
        }

        let movement = world.movement().unwrap();
        assert!(movement.pending().is_empty());
        assert!(movement.predicted().in_bounds(GRID_SIZE));
    }
}

/// CONNECTION LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// Tests that closing a connection announces the departure exactly once
    #[tokio::test]
    async fn disconnect_broadcasts_user_left_once() {
        let (url, registry) = start_default_server().await;

        let alice = join(&url, None).await;
        let mut bob = join(&url, None).await;
        wait_for_members(&registry, "default-space", 2).await;

        alice.connection.close().await.unwrap();

        assert_eq!(
            recv(&mut bob.connection).await,
            ServerMessage::UserLeft {
                user_id: alice.user_id.clone(),
            }
        );
        wait_for_members(&registry, "default-space", 1).await;
        assert_silent(&mut bob.connection).await;
    }

    /// Tests that a room is removed when its last member disconnects
    #[tokio::test]
    async fn last_member_leaving_removes_room() {
        let (url, registry) = start_default_server().await;

        let alice = join(&url, Some("solo")).await;
        wait_for_members(&registry, "solo", 1).await;
        drop(alice);

        for _ in 0..100 {
            if registry.room_count().await == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("room was not removed");
    }

    /// Tests that garbage frames are dropped without closing the connection
    #[tokio::test]
    async fn malformed_frames_do_not_close_connection() {
        let (url, _registry) = start_default_server().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        for text in ["garbage", r#"{"type":"wave"}"#, r#"{"type":"move","payload":{"x":[]}}"#] {
            ws.send(Message::Text(text.to_string())).await.unwrap();
        }
        ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
        ws.send(Message::Text(r#"{"type":"join","payload":{}}"#.to_string()))
            .await
            .unwrap();

        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .unwrap();
        let text = frame.into_text().unwrap();
        assert!(matches!(
            ServerMessage::parse(&text).unwrap(),
            ServerMessage::SpaceJoined { .. }
        ));
    }

    /// Tests that a client-initiated close is answered with a close frame
    #[tokio::test]
    async fn client_close_is_acknowledged() {
        let (url, registry) = start_default_server().await;
        let (mut ws, _) = connect_async(url.as_str()).await.unwrap();

        ws.send(Message::Text(r#"{"type":"join","payload":{}}"#.to_string()))
            .await
            .unwrap();
        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .unwrap();
        assert!(frame.is_text());
        wait_for_members(&registry, "default-space", 1).await;

        ws.close(None).await.unwrap();

        let reply = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("server never answered the close");
        assert!(matches!(reply, Some(Ok(Message::Close(_)))), "got {:?}", reply);
        wait_for_members(&registry, "default-space", 0).await;
    }

    /// Tests that reconnecting produces a new anonymous user id
    #[tokio::test]
    async fn reconnect_gets_fresh_identity() {
        let (url, _registry) = start_default_server().await;

        let first = join(&url, None).await;
        let first_id = first.user_id.clone();
        first.connection.close().await.unwrap();

        let second = join(&url, None).await;
        assert_ne!(second.user_id, first_id);
    }
}
