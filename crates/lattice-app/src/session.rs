//! A connected client: network session plus its world cache.
//!
//! There is no window. Frames are driven against a [`HeadlessDevice`], which
//! still exercises the full frame-in-progress protocol of the cache.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use lattice_client::{ChunkCache, DeviceStats, FlushReport, Frustum, HeadlessDevice, RenderDevice};
use lattice_net::{ChunkRequest, GameClient, Message, PlayerMove, PlayerTransform};
use lattice_voxel::{CHUNK_SIZE, ChunkCoordinate};
use rustc_hash::FxHashSet;

/// Vertical chunk layers requested around the player.
const VERTICAL_RADIUS: i32 = 1;

/// What one frame did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub drawn: usize,
    pub flushed: FlushReport,
    pub rebuilt: usize,
}

pub struct ClientSession {
    client: GameClient,
    cache: ChunkCache,
    device: Arc<HeadlessDevice>,
    requested: FxHashSet<ChunkCoordinate>,
    position: [f32; 3],
    yaw: f32,
    render_distance: i32,
    max_rebuilds: usize,
    connected: bool,
}

impl ClientSession {
    pub fn new(client: GameClient, render_distance: i32, max_rebuilds: usize) -> Self {
        let device = Arc::new(HeadlessDevice::new());
        let cache = ChunkCache::new(Arc::clone(&device) as Arc<dyn RenderDevice>);
        device.watch_frame_flag(cache.frame_flag());
        let position = client.spawn_position();
        Self {
            client,
            cache,
            device,
            requested: FxHashSet::default(),
            position,
            yaw: 0.0,
            render_distance: render_distance.max(0),
            max_rebuilds,
            connected: true,
        }
    }

    pub fn client(&self) -> &GameClient {
        &self.client
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    pub fn device_stats(&self) -> DeviceStats {
        self.device.stats()
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.client.is_connected()
    }

    /// Requests every chunk within the render distance not asked for yet.
    /// Returns how many requests were sent.
    pub fn request_nearby_chunks(&mut self) -> usize {
        let center = ChunkCoordinate::containing(self.position);
        let r = self.render_distance;
        let mut sent = 0;
        for dx in -r..=r {
            for dz in -r..=r {
                for dy in -VERTICAL_RADIUS..=VERTICAL_RADIUS {
                    let coord = center.offset(dx, dy, dz);
                    if self.requested.contains(&coord) {
                        continue;
                    }
                    if self.client.send(&Message::ChunkRequest(ChunkRequest { coord })) {
                        self.requested.insert(coord);
                        sent += 1;
                    }
                }
            }
        }
        sent
    }

    /// Applies everything the server has sent. Returns `false` once the
    /// server has closed the session.
    pub fn pump(&mut self) -> bool {
        while let Some(message) = self.client.try_receive() {
            self.handle(message);
        }
        self.is_connected()
    }

    fn handle(&mut self, message: Message) {
        match &message {
            Message::ChunkData(_) | Message::BlockUpdate(_) => {
                self.cache.apply_message(&message);
            }
            Message::PlayerJoin(join) => {
                tracing::info!(player_id = join.player_id, "{} joined", join.name);
            }
            Message::PlayerLeave(leave) => {
                tracing::info!(player_id = leave.player_id, "player left");
            }
            Message::ChatMessage(chat) => {
                tracing::info!(player_id = chat.player_id, "<chat> {}", chat.text);
            }
            Message::Error(error) => {
                tracing::warn!(code = error.code, "server error: {}", error.message);
            }
            Message::Disconnect(notice) => {
                tracing::info!(reason = %notice.reason, "disconnected");
                self.connected = false;
            }
            Message::Pong(pong) => {
                let rtt = lattice_net::unix_millis().saturating_sub(pong.timestamp_ms);
                tracing::debug!(rtt_ms = rtt, "pong");
            }
            other => {
                tracing::trace!(kind = ?other.message_type(), "unhandled message");
            }
        }
    }

    /// Fixed-step work: turn slowly, report the transform, request chunks,
    /// apply incoming traffic.
    pub fn update(&mut self, dt: f64) {
        self.yaw = (self.yaw + 0.5 * dt as f32) % std::f32::consts::TAU;
        self.client.send(&Message::PlayerMove(PlayerMove(PlayerTransform {
            player_id: self.client.player_id(),
            position: self.position,
            yaw: self.yaw,
            pitch: 0.0,
        })));
        self.request_nearby_chunks();
        self.pump();
    }

    /// One frame: record draws with the frame flag raised, then flush
    /// deferred mesh work and rebuild a bounded number of dirty meshes.
    pub fn render_frame(&self) -> FrameSummary {
        let frustum = self.frustum();

        self.cache.set_frame_in_progress(true);
        let drawn = self.cache.visible_chunk_meshes(&frustum).len();
        self.cache.set_frame_in_progress(false);

        let flushed = self.cache.flush_deferred();
        let rebuilt = self.cache.update_dirty(self.max_rebuilds);
        FrameSummary { drawn, flushed, rebuilt }
    }

    fn frustum(&self) -> Frustum {
        let eye = Vec3::from(self.position) + Vec3::new(0.0, 1.6, 0.0);
        let forward = Vec3::new(self.yaw.sin(), -0.2, -self.yaw.cos()).normalize();
        let far = ((self.render_distance + 1) as usize * CHUNK_SIZE) as f32 * 1.5;
        let view = Mat4::look_to_rh(eye, forward, Vec3::Y);
        let proj = Mat4::perspective_rh(70f32.to_radians(), 16.0 / 9.0, 0.1, far.max(1.0));
        Frustum::from_view_projection(&(proj * view))
    }

    pub fn disconnect(&mut self) {
        self.client.disconnect();
        self.connected = false;
    }
}
