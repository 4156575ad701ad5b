use std::env;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use glam::Vec3;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6019;

pub const HOST_ENV: &str = "SPLAT_BRIDGE_HOST";
pub const PORT_ENV: &str = "SPLAT_BRIDGE_PORT";
pub const SESSION_POLICY_ENV: &str = "SPLAT_BRIDGE_SESSION_POLICY";

/// How the server treats a connection that arrives while another is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// Every connection is served and all of them write the same pose state.
    #[default]
    Shared,
    /// Only one connection is served; later ones are closed right away.
    Exclusive,
}

impl FromStr for SessionPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(Self::Shared),
            "exclusive" => Ok(Self::Exclusive),
            other => Err(anyhow!(
                "unknown session policy {other:?}, expected \"shared\" or \"exclusive\""
            )),
        }
    }
}

/// Where and how the websocket server listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub session_policy: SessionPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            session_policy: SessionPolicy::Shared,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by any `SPLAT_BRIDGE_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(host) = lookup(HOST_ENV).filter(|host| !host.trim().is_empty()) {
            config.host = host.trim().to_string();
        }
        if let Some(port) = lookup(PORT_ENV) {
            config.port = port
                .trim()
                .parse()
                .with_context(|| format!("{PORT_ENV} must be a port number, got {port:?}"))?;
        }
        if let Some(policy) = lookup(SESSION_POLICY_ENV) {
            config.session_policy = policy.parse().context(SESSION_POLICY_ENV)?;
        }
        Ok(config)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Camera and image settings for the render loop driven by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    /// Vertical field of view in degrees.
    pub fov_y: f32,
    pub znear: f32,
    pub zfar: f32,
    pub background: Vec3,
    /// Camera translation before any pose arrives; poses are offsets from it.
    pub initial_translation: Vec3,
    pub frames_per_second: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            fov_y: 60.0,
            znear: crate::camera::DEFAULT_ZNEAR,
            zfar: crate::camera::DEFAULT_ZFAR,
            background: Vec3::ZERO,
            initial_translation: Vec3::new(0.0, 0.0, 4.0),
            frames_per_second: 30.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_listen_on_loopback_6019() {
        let config = BridgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.endpoint(), "127.0.0.1:6019");
        assert_eq!(config.session_policy, SessionPolicy::Shared);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[
            (HOST_ENV, "0.0.0.0"),
            (PORT_ENV, " 7000 "),
            (SESSION_POLICY_ENV, "Exclusive"),
        ]))
        .unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7000);
        assert_eq!(config.session_policy, SessionPolicy::Exclusive);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(BridgeConfig::from_lookup(lookup(&[(PORT_ENV, "http")])).is_err());
        assert!(BridgeConfig::from_lookup(lookup(&[(SESSION_POLICY_ENV, "many")])).is_err());
    }
}
