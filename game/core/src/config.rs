use ferrite::prelude::{ReactorConfig, RuntimeConfig, SceneConfig};
use ferrite::logic::thread::LogicConfig;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 28008;

#[derive(Serialize, Deserialize, Clone)]
pub struct Server {
    pub address: String,
    pub max_sessions: usize,
    /// Reactor worker pool width; 0 means hardware concurrency.
    pub worker_threads: usize,
    pub timeout_ms: u64,
    pub timeout_cycle_ms: u64,
    pub reconnect_interval_ms: u64,
    pub nodelay: bool,
    pub strict_packet_ids: bool,
    pub send_queue_limit: usize,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Game {
    pub logic_threads: usize,
    pub fixed_time_step_ms: u64,
    pub target_frame_time_us: u64,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Aoi {
    pub min_x: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_z: f32,
    pub cell_size: f32,
    pub hysteresis: f32,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct GameConfig {
    pub log_level: String,
    pub server: Server,
    pub game: Game,
    pub aoi: Aoi,
}

impl Default for GameConfig {
    fn default() -> GameConfig {
        GameConfig {
            log_level: "info".to_string(),
            server: Server {
                address: format!("0.0.0.0:{}", DEFAULT_PORT),
                max_sessions: 10_000,
                worker_threads: 0,
                timeout_ms: 60_000,
                timeout_cycle_ms: 10_000,
                reconnect_interval_ms: 1000,
                nodelay: true,
                strict_packet_ids: false,
                send_queue_limit: 1000,
            },
            game: Game {
                logic_threads: 2,
                fixed_time_step_ms: 20,
                target_frame_time_us: 16_660,
            },
            aoi: Aoi {
                min_x: 0.0,
                min_z: 0.0,
                max_x: 1000.0,
                max_z: 1000.0,
                cell_size: 100.0,
                hysteresis: 10.0,
            },
        }
    }
}

impl GameConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GameConfig {
        serdeconv::from_toml_file(path).expect("Error loading game configuration file")
    }

    pub fn reactor_config(&self) -> ReactorConfig {
        let defaults = ReactorConfig::default();
        ReactorConfig {
            worker_threads: match self.server.worker_threads {
                0 => defaults.worker_threads,
                explicit => explicit,
            },
            max_sessions: self.server.max_sessions,
            timeout_ms: self.server.timeout_ms,
            timeout_cycle_ms: self.server.timeout_cycle_ms,
            reconnect_interval_ms: self.server.reconnect_interval_ms,
            nodelay: self.server.nodelay,
            strict_packet_ids: self.server.strict_packet_ids,
            send_queue_limit: self.server.send_queue_limit,
        }
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            logic_threads: self.game.logic_threads,
            logic: LogicConfig {
                fixed_step: Duration::from_millis(self.game.fixed_time_step_ms),
                target_frame: Duration::from_micros(self.game.target_frame_time_us),
            },
        }
    }

    pub fn scene_config(&self) -> SceneConfig {
        SceneConfig {
            min_x: self.aoi.min_x,
            min_z: self.aoi.min_z,
            max_x: self.aoi.max_x,
            max_z: self.aoi.max_z,
            cell_size: self.aoi.cell_size,
            hysteresis: self.aoi.hysteresis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_the_deployment_surface() {
        let config = GameConfig::default();

        assert_eq!(config.server.max_sessions, 10_000);
        assert_eq!(config.server.timeout_ms, 60_000);
        assert_eq!(config.server.timeout_cycle_ms, 10_000);
        assert_eq!(config.server.reconnect_interval_ms, 1000);
        assert_eq!(config.game.logic_threads, 2);
        assert_eq!(config.game.fixed_time_step_ms, 20);
        assert_eq!(config.aoi.cell_size, 100.0);
        assert_eq!(config.aoi.hysteresis, 10.0);
    }

    #[test]
    fn test_parse_from_toml() {
        let raw = r#"
log_level = "debug"

[server]
address = "127.0.0.1:9000"
max_sessions = 64
worker_threads = 4
timeout_ms = 5000
timeout_cycle_ms = 1000
reconnect_interval_ms = 500
nodelay = true
strict_packet_ids = true
send_queue_limit = 100

[game]
logic_threads = 3
fixed_time_step_ms = 10
target_frame_time_us = 8000

[aoi]
min_x = -100.0
min_z = -100.0
max_x = 100.0
max_z = 100.0
cell_size = 10.0
hysteresis = 1.0
"#;

        let config: GameConfig = serdeconv::from_toml_str(raw).unwrap();

        assert_eq!(config.server.address, "127.0.0.1:9000");
        assert_eq!(config.game.logic_threads, 3);
        assert!(config.server.strict_packet_ids);

        let reactor = config.reactor_config();
        assert_eq!(reactor.worker_threads, 4);
        assert_eq!(reactor.max_sessions, 64);

        let runtime = config.runtime_config();
        assert_eq!(runtime.logic.fixed_step, Duration::from_millis(10));

        let scene = config.scene_config();
        assert_eq!(scene.cell_size, 10.0);
    }

    #[test]
    fn test_worker_threads_zero_means_auto() {
        let config = GameConfig::default();
        assert!(config.reactor_config().worker_threads >= 1);
    }
}
