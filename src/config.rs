//! Layered runtime configuration: built-in defaults, overridden by
//! environment variables, overridden by CLI positional arguments.
//!
//! The teacher wires runtime parameters through plain constructor
//! arguments (`BTreeTable::new(path, ..)`, `LogManager::new(path)`); this
//! module keeps that spirit for a single-process server but adds the
//! env-over-default layering a deployable binary needs.

use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_DB_FILE: &str = "minidb.dat";
pub const DEFAULT_WAL_FILE: &str = "minidb.wal";
pub const DEFAULT_BUFFER_POOL_FRAMES: usize = 100;
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_file: String,
    pub wal_file: String,
    pub buffer_pool_frames: usize,
    pub lock_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_file: DEFAULT_DB_FILE.to_string(),
            wal_file: DEFAULT_WAL_FILE.to_string(),
            buffer_pool_frames: DEFAULT_BUFFER_POOL_FRAMES,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Build a config from defaults, then environment variables, then
    /// the server binary's positional `[port] [db_file]` CLI arguments.
    pub fn from_env_and_args(args: &[String]) -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("MINIDB_PORT") {
            if let Ok(v) = v.parse() {
                cfg.port = v;
            }
        }
        if let Ok(v) = env::var("MINIDB_DB_FILE") {
            cfg.db_file = v;
        }
        if let Ok(v) = env::var("MINIDB_WAL_FILE") {
            cfg.wal_file = v;
        }
        if let Ok(v) = env::var("MINIDB_LOCK_TIMEOUT_SECS") {
            if let Ok(v) = v.parse() {
                cfg.lock_timeout = Duration::from_secs(v);
            }
        }

        if let Some(port) = args.get(0) {
            if let Ok(v) = port.parse() {
                cfg.port = v;
            }
        }
        if let Some(db_file) = args.get(1) {
            cfg.db_file = db_file.clone();
        }

        cfg
    }
}
