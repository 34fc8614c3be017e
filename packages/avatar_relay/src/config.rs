use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Relay config (figment-deserialized from defaults / avatar.toml / env vars)
// =============================================================================
//
//   avatar.toml:     [backend]
//                    port = 8765
//
//   env var:         AVATAR_BACKEND__PORT=8765   (double underscore = nesting)

pub const DEFAULT_CONFIG_FILE: &str = "avatar.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub hub: HubFileConfig,
}

/// Downstream listener (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Name clients use to reach the relay; sent upstream as the Origin
    #[serde(default = "default_public_host")]
    pub public_host: String,
    /// Directory served under `/audio`; unset disables media serving
    #[serde(default)]
    pub audio_dir: Option<PathBuf>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: default_public_host(),
            audio_dir: None,
        }
    }
}

impl ServerFileConfig {
    pub fn origin(&self) -> String {
        format!("http://{}:{}", self.public_host, self.port)
    }
}

/// Upstream AI backend (lives under `[backend]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    #[serde(default = "default_backend_scheme")]
    pub scheme: String,
    #[serde(default = "default_backend_path")]
    pub path: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Client messages buffered toward the backend while a write is in flight
    #[serde(default = "default_send_queue_capacity")]
    pub send_queue_capacity: usize,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            scheme: default_backend_scheme(),
            path: default_backend_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            send_queue_capacity: default_send_queue_capacity(),
        }
    }
}

impl BackendFileConfig {
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Downstream fan-out (lives under `[hub]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HubFileConfig {
    /// Per-client outbound queue
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    /// Backend frames retained for slow clients before they start skipping
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl Default for HubFileConfig {
    fn default() -> Self {
        Self {
            send_channel_capacity: default_send_channel_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_public_host() -> String {
    "localhost".to_string()
}
fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_port() -> u16 {
    8765
}
fn default_backend_scheme() -> String {
    "ws".to_string()
}
fn default_backend_path() -> String {
    "/".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}
fn default_send_queue_capacity() -> usize {
    64
}
fn default_send_channel_capacity() -> usize {
    100
}
fn default_broadcast_capacity() -> usize {
    256
}

/// Build a figment that layers: defaults → avatar.toml → AVATAR_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `AVATAR_BACKEND__PORT=9000`  →  `backend.port = 9000`
///   `AVATAR_SERVER__AUDIO_DIR=/srv/audio`  →  `server.audio_dir = "/srv/audio"`
pub fn load_config(path: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed("AVATAR_").split("__"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.server.port, 3000);
        assert_eq!(fc.server.origin(), "http://localhost:3000");
        assert_eq!(fc.backend.url(), "ws://127.0.0.1:8765/");
        assert_eq!(fc.backend.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(fc.hub.send_channel_capacity, 100);
        assert!(fc.server.audio_dir.is_none());
    }

    #[test]
    fn test_backend_url_normalizes_path() {
        let backend = BackendFileConfig {
            scheme: "wss".into(),
            host: "ai.example".into(),
            port: 443,
            path: "chat".into(),
            ..Default::default()
        };
        assert_eq!(backend.url(), "wss://ai.example:443/chat");
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(Some(&tmp.path().join("absent.toml")))
            .extract()
            .unwrap();
        assert_eq!(fc.backend.port, 8765);
        assert_eq!(fc.server.host, "0.0.0.0");
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("avatar.toml");
        std::fs::write(
            &path,
            "[server]\nport = 4000\naudio_dir = \"/srv/audio\"\n\n[backend]\nhost = \"10.0.0.2\"\nreconnect_delay_ms = 250\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(Some(&path)).extract().unwrap();
        assert_eq!(fc.server.port, 4000);
        assert_eq!(fc.server.audio_dir.as_deref(), Some(Path::new("/srv/audio")));
        assert_eq!(fc.backend.url(), "ws://10.0.0.2:8765/");
        assert_eq!(fc.backend.reconnect_delay(), Duration::from_millis(250));
        // Untouched sections keep their defaults
        assert_eq!(fc.hub.broadcast_capacity, 256);
    }

    #[test]
    fn test_load_config_rejects_bad_types() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("avatar.toml");
        std::fs::write(&path, "[backend]\nport = \"not a port\"\n").unwrap();
        assert!(load_config(Some(&path)).extract::<FileConfig>().is_err());
    }
}
