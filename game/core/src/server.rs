use crate::config::GameConfig;
use crate::messages::{self, CgEcho, CgLogin, CgMove, Encode, GcEcho};
use crate::player::Player;
use ferrite::prelude::*;
use flint::logging;
use std::net::SocketAddr;
use std::sync::Arc;

const PLAYER_MOVE_SPEED: f32 = 0.5;

/// Attaches a player object to every accepted session and tears it down on
/// disconnect. The player is the session's owner; handlers address it
/// through the owner slot.
struct WorldHooks {
    scene: Arc<Scene>,
    log: logging::Logger,
}

impl NetEvents for WorldHooks {
    fn on_connect(&self, session: &SessionHandle) {
        let player = self.scene.spawn(Player::new(session.clone(), PLAYER_MOVE_SPEED, &self.log));
        session.set_owner(Arc::new(player));

        logging::info!(self.log, "user connected";
                       "context" => "on_connect",
                       "session" => session.id().raw());
    }

    fn on_disconnect(&self, session: &SessionHandle) {
        if let Some(player) = owner_of(session) {
            player.destroy();
        }

        logging::info!(self.log, "user disconnected";
                       "context" => "on_disconnect",
                       "session" => session.id().raw());
    }
}

fn owner_of(session: &SessionHandle) -> Option<ObjectRef<Player>> {
    session
        .owner()
        .and_then(|owner| owner.downcast::<ObjectRef<Player>>().ok())
        .map(|player| (*player).clone())
}

/// Builds the packet dispatcher. Handlers run on reactor workers and only
/// touch entity state by posting to the owning player's job queue.
fn build_dispatcher(log: &logging::Logger) -> Dispatcher {
    let mut dispatcher = Dispatcher::new(log);

    dispatcher.register::<CgEcho, _>(messages::CG_ECHO, |session, message: CgEcho| {
        let reply = GcEcho { data: message.data };
        if let Ok(payload) = reply.to_payload() {
            session.send(payload);
        }
    });

    dispatcher.register::<CgLogin, _>(messages::CG_LOGIN, |session, message: CgLogin| {
        if let Some(player) = owner_of(session) {
            player.post(move |player, obj| player.handle_login(obj, message.name));
        }
    });

    dispatcher.register::<CgMove, _>(messages::CG_MOVE, |session, message: CgMove| {
        if let Some(player) = owner_of(session) {
            player.post(move |player, obj| player.handle_move(obj, message.x, message.z));
        }
    });

    dispatcher
}

/// The assembled server: logic runtime, world scene and network reactor.
pub struct GameWorld {
    runtime: Runtime,
    reactor: Reactor,
    scene: Arc<Scene>,
    address: SocketAddr,
    log: logging::Logger,
}

impl GameWorld {
    /// Brings the whole stack up: logic threads, the world scene, the
    /// dispatcher and the listening reactor.
    pub fn start<'a, L: Into<Option<&'a logging::Logger>>>(
        config: &GameConfig,
        log: L,
    ) -> NetworkResult<GameWorld> {
        let log = logging::child(log);

        let runtime = Runtime::new(config.runtime_config(), &log);
        runtime.start();

        let scene = runtime.create_scene(0, config.scene_config());

        let hooks = Arc::new(WorldHooks {
            scene: scene.clone(),
            log: log.clone(),
        });

        let dispatcher = build_dispatcher(&log);
        let mut reactor = Reactor::new(config.reactor_config(), dispatcher, hooks, &log)?;
        let address = reactor.start_server(&config.server.address)?;

        logging::info!(log, "game world started";
                       "context" => "start",
                       "address" => %address);

        Ok(GameWorld {
            runtime,
            reactor,
            scene,
            address,
            log,
        })
    }

    #[inline]
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    #[inline]
    pub fn stats(&self) -> NetStats {
        self.reactor.stats()
    }

    #[inline]
    pub fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    pub fn stop(&mut self) {
        logging::info!(self.log, "game world stopping"; "context" => "stop");
        self.reactor.stop();
        self.runtime.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{GcLoginOk, GcMove};
    use byteorder::{ByteOrder, LittleEndian};
    use ferrite::prelude::Decode;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    fn test_config() -> GameConfig {
        let mut config = GameConfig::default();
        config.server.address = "127.0.0.1:0".to_string();
        config.server.max_sessions = 8;
        config.server.worker_threads = 2;
        config.server.timeout_ms = 0;
        config
    }

    fn read_frame(stream: &mut TcpStream) -> (u32, Payload) {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).unwrap();
        let length = LittleEndian::read_u32(&header[0..4]) as usize;
        let packet_id = LittleEndian::read_u32(&header[4..8]);

        let mut body = vec![0u8; length - 8];
        stream.read_exact(&mut body).unwrap();

        let mut payload = Payload::alloc();
        payload.put_bytes(&body).unwrap();
        (packet_id, payload)
    }

    fn wait_until<F: FnMut() -> bool>(mut probe: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if probe() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        probe()
    }

    #[test]
    fn test_world_echo_and_login() {
        let mut world = GameWorld::start(&test_config(), None).unwrap();
        let address = world.address();

        let mut client = TcpStream::connect(address).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        // Echo.
        let echo = CgEcho { data: b"ping".to_vec() };
        client.write_all(echo.to_payload().unwrap().frame_bytes()).unwrap();

        let (packet_id, mut payload) = read_frame(&mut client);
        assert_eq!(packet_id, messages::GC_ECHO);
        assert_eq!(GcEcho::decode(&mut payload).unwrap().data, b"ping");

        // Login produces an acknowledgement carrying the player's sn.
        let login = CgLogin { name: "ruks".to_string() };
        client.write_all(login.to_payload().unwrap().frame_bytes()).unwrap();

        let (packet_id, mut payload) = read_frame(&mut client);
        assert_eq!(packet_id, messages::GC_LOGIN_OK);
        let ack = GcLoginOk::decode(&mut payload).unwrap();
        assert!(ack.sn > 0);

        // The player object joined the world scene.
        assert!(wait_until(|| world.scene().contains(ack.sn), Duration::from_secs(2)));

        // Move request is acknowledged from the logic side.
        let request = CgMove { x: 10.0, z: 20.0 };
        client.write_all(request.to_payload().unwrap().frame_bytes()).unwrap();

        let (packet_id, mut payload) = read_frame(&mut client);
        assert_eq!(packet_id, messages::GC_MOVE);
        let echo_move = GcMove::decode(&mut payload).unwrap();
        assert_eq!(echo_move.sn, ack.sn);
        assert_eq!(echo_move.x, 10.0);

        // Dropping the connection destroys the player.
        drop(client);
        assert!(wait_until(|| world.scene().object_count() == 0, Duration::from_secs(2)));

        world.stop();
    }
}
