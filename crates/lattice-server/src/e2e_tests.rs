//! Full client/server scenarios: real sockets or the in-process link, a
//! ticking server, and the client chunk cache on the receiving end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_client::{ChunkCache, HeadlessDevice, RenderDevice};
use lattice_net::{
    BlockBreak, BlockPlace, ChatMessage, ChunkRequest, ClientConfig, ClientError, GameClient, Message,
    NetworkServerConfig, PlayerMove, PlayerTransform,
};
use lattice_tasks::TaskScheduler;
use lattice_voxel::{BlockPos, BlockType, ChunkCoordinate};

use crate::save::{MemorySaveStore, SaveStore};
use crate::server::{ERROR_CHUNK_OUT_OF_RANGE, GameServer, ServerConfig};

const WAIT: Duration = Duration::from_secs(10);

fn config(max_players: usize) -> ServerConfig {
    ServerConfig {
        world_name: "e2e".into(),
        max_players,
        tick_rate: 50,
        view_distance: 1,
        network: NetworkServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            poll_interval: Duration::from_millis(2),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn tcp_server(max_players: usize) -> (GameServer, SocketAddr) {
    let server = GameServer::new(
        config(max_players),
        Arc::new(MemorySaveStore::new()) as Arc<dyn SaveStore>,
        Arc::new(TaskScheduler::new(2).unwrap()),
    )
    .unwrap();
    server.start().unwrap();
    let addr = server.network().local_addr().unwrap();
    (server, addr)
}

fn client_config() -> ClientConfig {
    ClientConfig {
        handshake_timeout: WAIT,
        poll_interval: Duration::from_millis(2),
        ..Default::default()
    }
}

/// Receives until `pick` returns something, skipping other traffic.
fn wait_for<T>(client: &GameClient, mut pick: impl FnMut(&Message) -> Option<T>) -> T {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Some(message) = client.receive_timeout(Duration::from_millis(50)) {
            if let Some(found) = pick(&message) {
                return found;
            }
        }
    }
    panic!("expected message did not arrive");
}

#[test]
fn test_block_break_reaches_other_client_cache() {
    let (server, addr) = tcp_server(4);

    let alice = GameClient::connect(addr, "Alice", &client_config()).unwrap();
    assert_eq!(alice.player_id(), 1);
    assert_eq!(alice.spawn_position(), [0.0, 18.0, 0.0]);

    let bob = GameClient::connect(addr, "Bob", &client_config()).unwrap();
    assert_eq!(bob.player_id(), 2);

    let seen_by_bob = wait_for(&bob, |m| match m {
        Message::PlayerJoin(join) => Some(join.clone()),
        _ => None,
    });
    assert_eq!((seen_by_bob.player_id, seen_by_bob.name.as_str()), (1, "Alice"));
    let seen_by_alice = wait_for(&alice, |m| match m {
        Message::PlayerJoin(join) => Some(join.player_id),
        _ => None,
    });
    assert_eq!(seen_by_alice, 2);

    // Bob mirrors the spawn chunk.
    let device = Arc::new(HeadlessDevice::new());
    let cache = ChunkCache::new(Arc::clone(&device) as Arc<dyn RenderDevice>);
    device.watch_frame_flag(cache.frame_flag());

    let origin = ChunkCoordinate::new(0, 0, 0);
    assert!(bob.send(&Message::ChunkRequest(ChunkRequest { coord: origin })));
    let chunk = wait_for(&bob, |m| match m {
        Message::ChunkData(data) if data.coord == origin => Some(m.clone()),
        _ => None,
    });
    assert!(cache.apply_message(&chunk));

    let target = BlockPos::new(5, 10, 5);
    let original = server.get_block(target);
    assert!(original.is_solid());
    assert_eq!(cache.get_block(target), Some(original));

    // Alice breaks a block while Bob is mid-frame.
    assert!(alice.send(&Message::BlockBreak(BlockBreak { player_id: 1, pos: target })));
    let update = wait_for(&bob, |m| match m {
        Message::BlockUpdate(update) if update.pos == target => Some(m.clone()),
        _ => None,
    });
    let Message::BlockUpdate(fields) = &update else {
        unreachable!()
    };
    assert_eq!(fields.block, BlockType::Air);
    assert_eq!(fields.caused_by, 1);

    cache.set_frame_in_progress(true);
    assert!(cache.apply_message(&update));
    assert_eq!(cache.deferred_coords(), vec![origin]);
    cache.set_frame_in_progress(false);

    assert_eq!(cache.flush_deferred().rebuilt, 1);
    assert_eq!(cache.get_block(target), Some(BlockType::Air));
    assert!(cache.is_modified(origin));
    assert_eq!(device.stats().frame_violations, 0);
    assert_eq!(server.get_block(target), BlockType::Air);

    server.stop();
}

#[test]
fn test_duplicate_name_and_full_server_are_rejected() {
    let (server, addr) = tcp_server(2);

    let _alice = GameClient::connect(addr, "Alice", &client_config()).unwrap();
    match GameClient::connect(addr, "ALICE", &client_config()) {
        Err(ClientError::Rejected { reason }) => assert!(reason.contains("already taken"), "{reason}"),
        other => panic!("unexpected {:?}", other.map(|c| c.player_id())),
    }

    let _bob = GameClient::connect(addr, "Bob", &client_config()).unwrap();
    match GameClient::connect(addr, "Carol", &client_config()) {
        Err(ClientError::Rejected { reason }) => assert!(reason.contains("full"), "{reason}"),
        other => panic!("unexpected {:?}", other.map(|c| c.player_id())),
    }
    assert_eq!(server.player_count(), 2);

    server.stop();
}

#[test]
fn test_leaving_player_is_announced() {
    let (server, addr) = tcp_server(4);
    let alice = GameClient::connect(addr, "Alice", &client_config()).unwrap();
    let bob = GameClient::connect(addr, "Bob", &client_config()).unwrap();

    bob.disconnect();
    let left = wait_for(&alice, |m| match m {
        Message::PlayerLeave(leave) => Some(leave.player_id),
        _ => None,
    });
    assert_eq!(left, 2);
    assert!(server.find_player("Bob").is_none());
    assert_eq!(server.player_count(), 1);

    server.stop();
}

#[test]
fn test_denied_edit_sends_correction() {
    let (server, addr) = tcp_server(4);
    server.set_permission_callback(Arc::new(|_player: u32, _pos: BlockPos, _block: BlockType| false));
    let alice = GameClient::connect(addr, "Alice", &client_config()).unwrap();

    let target = BlockPos::new(3, 11, 3);
    let actual = server.get_block(target);
    alice.send(&Message::BlockBreak(BlockBreak { player_id: 1, pos: target }));
    let correction = wait_for(&alice, |m| match m {
        Message::BlockUpdate(update) if update.pos == target => Some((update.block, update.caused_by)),
        _ => None,
    });
    assert_eq!(correction, (actual, 0));
    assert_eq!(server.get_block(target), actual);

    server.stop();
}

#[test]
fn test_far_chunk_request_is_refused() {
    let (server, addr) = tcp_server(4);
    let alice = GameClient::connect(addr, "Alice", &client_config()).unwrap();

    alice.send(&Message::ChunkRequest(ChunkRequest {
        coord: ChunkCoordinate::new(40, 0, 0),
    }));
    let code = wait_for(&alice, |m| match m {
        Message::Error(error) => Some(error.code),
        _ => None,
    });
    assert_eq!(code, ERROR_CHUNK_OUT_OF_RANGE);

    server.stop();
}

#[test]
fn test_extreme_coordinates_keep_the_server_alive() {
    let (server, addr) = tcp_server(4);
    let alice = GameClient::connect(addr, "Alice", &client_config()).unwrap();

    for coord in [
        ChunkCoordinate::new(i32::MIN, 0, 0),
        ChunkCoordinate::new(i32::MAX, i32::MIN, i32::MAX),
    ] {
        alice.send(&Message::ChunkRequest(ChunkRequest { coord }));
        let code = wait_for(&alice, |m| match m {
            Message::Error(error) => Some(error.code),
            _ => None,
        });
        assert_eq!(code, ERROR_CHUNK_OUT_OF_RANGE);
    }

    // Far below bedrock the world is empty, so the corner block can be set.
    let corner = BlockPos::new(i32::MAX, i32::MIN, i32::MAX);
    alice.send(&Message::BlockPlace(BlockPlace {
        player_id: 1,
        pos: corner,
        block: BlockType::Stone,
    }));
    let placed = wait_for(&alice, |m| match m {
        Message::BlockUpdate(update) if update.pos == corner => Some(update.block),
        _ => None,
    });
    assert_eq!(placed, BlockType::Stone);

    let sky = BlockPos::new(i32::MIN, i32::MAX, i32::MIN);
    alice.send(&Message::BlockBreak(BlockBreak { player_id: 1, pos: sky }));
    let correction = wait_for(&alice, |m| match m {
        Message::BlockUpdate(update) if update.pos == sky => Some((update.block, update.caused_by)),
        _ => None,
    });
    assert_eq!(correction, (BlockType::Air, 0));

    // Interest tracking around a player parked on the world's edge.
    alice.send(&Message::PlayerMove(PlayerMove(PlayerTransform {
        player_id: 1,
        position: [f32::MAX, f32::MAX, f32::MIN],
        yaw: 0.0,
        pitch: 0.0,
    })));
    std::thread::sleep(Duration::from_millis(100));

    assert!(alice.ping());
    wait_for(&alice, |m| matches!(m, Message::Pong(_)).then_some(()));
    assert!(server.is_running());
    assert_eq!(server.get_block(corner), BlockType::Stone);

    server.stop();
}

#[test]
fn test_integrated_server_round_trip() {
    let server = GameServer::integrated(
        config(1),
        Arc::new(MemorySaveStore::new()) as Arc<dyn SaveStore>,
        Arc::new(TaskScheduler::new(2).unwrap()),
    )
    .unwrap();
    server.start().unwrap();

    let solo = GameClient::connect_local(server.network(), "Solo", WAIT).unwrap();
    assert_eq!(solo.player_id(), 1);

    let pos = BlockPos::new(0, 40, 0);
    solo.send(&Message::BlockPlace(BlockPlace {
        player_id: 1,
        pos,
        block: BlockType::Wood,
    }));
    let caused_by = wait_for(&solo, |m| match m {
        Message::BlockUpdate(update) if update.pos == pos && update.block == BlockType::Wood => {
            Some(update.caused_by)
        }
        _ => None,
    });
    assert_eq!(caused_by, 1);

    solo.send(&Message::ChatMessage(ChatMessage {
        player_id: 1,
        text: "  hello  ".into(),
    }));
    let text = wait_for(&solo, |m| match m {
        Message::ChatMessage(chat) => Some(chat.text.clone()),
        _ => None,
    });
    assert_eq!(text, "hello");

    assert!(solo.ping());
    wait_for(&solo, |m| matches!(m, Message::Pong(_)).then_some(()));

    server.stop();
    assert!(!server.is_running());
}
