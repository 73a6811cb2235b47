//! Application-level configuration loading: sync timings, room and transport settings.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    state::game::GameSettings,
    sync::{publisher::Redundancy, recovery::DEFAULT_DESYNC_GRACE_MS},
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_SYNC_CONFIG_PATH";

/// Periodic task cadences shared by the display and player contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    /// Truth store poll interval while pushes are quiet.
    pub poll_interval: Duration,
    /// Desync check interval.
    pub desync_check_interval: Duration,
    /// Player heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Trailing window the display counts heartbeats over.
    pub presence_window: Duration,
    /// Silence after which a player shows as reconnecting.
    pub stale_after: Duration,
    /// Silence after which an unsynchronised player asks for state.
    pub startup_grace: Duration,
    /// How far display truth may lead before it is adopted.
    pub desync_grace_ms: u64,
    /// Display driver tick.
    pub tick_interval: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            desync_check_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(5),
            presence_window: Duration::from_secs(15),
            stale_after: Duration::from_secs(5),
            startup_grace: Duration::from_secs(5),
            desync_grace_ms: DEFAULT_DESYNC_GRACE_MS,
            tick_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Fixed room code; generated at startup when absent.
    pub room_code: Option<String>,
    /// Sync cadences.
    pub timings: SyncTimings,
    /// Join snapshot re-emission.
    pub join_redundancy: Redundancy,
    /// Whether the broadcast transport is opened at all.
    pub broadcast_enabled: bool,
    /// Per-receiver buffer of the broadcast transport.
    pub broadcast_capacity: usize,
    /// Directory of the file-backed truth store; in-memory when absent.
    pub store_dir: Option<PathBuf>,
    /// Settings used when a lobby is opened without explicit ones.
    pub default_settings: GameSettings,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        room = ?app_config.room_code,
                        broadcast = app_config.broadcast_enabled,
                        "loaded sync configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    room_code: Option<String>,
    poll_interval_ms: u64,
    desync_check_interval_ms: u64,
    heartbeat_interval_ms: u64,
    presence_window_ms: u64,
    stale_after_ms: u64,
    startup_grace_ms: u64,
    desync_grace_ms: u64,
    tick_interval_ms: u64,
    join_redundancy_copies: u32,
    join_redundancy_interval_ms: u64,
    broadcast_enabled: bool,
    broadcast_capacity: usize,
    store_dir: Option<PathBuf>,
    game: GameSettings,
}

impl Default for RawConfig {
    fn default() -> Self {
        let timings = SyncTimings::default();
        let redundancy = Redundancy::default();
        let millis = |duration: Duration| duration.as_millis() as u64;
        Self {
            room_code: None,
            poll_interval_ms: millis(timings.poll_interval),
            desync_check_interval_ms: millis(timings.desync_check_interval),
            heartbeat_interval_ms: millis(timings.heartbeat_interval),
            presence_window_ms: millis(timings.presence_window),
            stale_after_ms: millis(timings.stale_after),
            startup_grace_ms: millis(timings.startup_grace),
            desync_grace_ms: timings.desync_grace_ms,
            tick_interval_ms: millis(timings.tick_interval),
            join_redundancy_copies: redundancy.copies,
            join_redundancy_interval_ms: millis(redundancy.interval),
            broadcast_enabled: true,
            broadcast_capacity: 64,
            store_dir: None,
            game: GameSettings::default(),
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        // Zero intervals would make tokio::time::interval panic.
        let interval = |ms: u64| Duration::from_millis(ms.max(1));
        Self {
            room_code: value
                .room_code
                .map(|code| code.trim().to_ascii_uppercase())
                .filter(|code| !code.is_empty()),
            timings: SyncTimings {
                poll_interval: interval(value.poll_interval_ms),
                desync_check_interval: interval(value.desync_check_interval_ms),
                heartbeat_interval: interval(value.heartbeat_interval_ms),
                presence_window: Duration::from_millis(value.presence_window_ms),
                stale_after: Duration::from_millis(value.stale_after_ms),
                startup_grace: Duration::from_millis(value.startup_grace_ms),
                desync_grace_ms: value.desync_grace_ms,
                tick_interval: interval(value.tick_interval_ms),
            },
            join_redundancy: Redundancy {
                copies: value.join_redundancy_copies,
                interval: interval(value.join_redundancy_interval_ms),
            },
            broadcast_enabled: value.broadcast_enabled,
            broadcast_capacity: value.broadcast_capacity,
            store_dir: value.store_dir,
            default_settings: value.game,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
