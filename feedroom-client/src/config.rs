//! Client configuration

use crate::types::{MediaLine, RoomId};
use serde::{Deserialize, Serialize};

/// Room client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Room to join
    pub room: RoomId,
    /// Prefix of the generated display name (`<prefix>-<n>`)
    pub display_prefix: String,
    /// Media lines assumed for a publisher that reports none
    pub fallback_mids: Vec<MediaLine>,
    /// Subscriber error codes that end the feed (428 = no such feed)
    pub terminal_error_codes: Vec<u16>,
    /// Join subscriptions with explicit `{feed, mid}` streams instead of the
    /// single-feed form
    pub subscribe_by_mid: bool,
    /// Local capture constraints
    pub capture: CaptureConfig,
    /// ICE servers passed to every handle attach
    pub ice_servers: Vec<IceServer>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            room: RoomId::from(1234),
            display_prefix: "user".to_string(),
            fallback_mids: vec!["0".to_string(), "1".to_string()],
            terminal_error_codes: vec![428],
            subscribe_by_mid: false,
            capture: CaptureConfig::default(),
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

impl ClientConfig {
    /// Check the configuration, returning every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.room.as_str().is_empty() {
            errors.push("client.room must not be empty".to_string());
        }
        if self.display_prefix.is_empty() {
            errors.push("client.display_prefix must not be empty".to_string());
        }
        if self.fallback_mids.iter().any(String::is_empty) {
            errors.push("client.fallback_mids must not contain empty entries".to_string());
        }
        if !self.capture.audio && !self.capture.video {
            errors.push("client.capture must enable audio or video".to_string());
        }
        for (i, server) in self.ice_servers.iter().enumerate() {
            if server.urls.is_empty() {
                errors.push(format!("client.ice_servers[{i}] has no urls"));
            }
            if server.urls.iter().any(|u| u.starts_with("turn")) && server.username.is_none() {
                errors.push(format!("client.ice_servers[{i}] is a TURN server without username"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn is_terminal_error(&self, code: u16) -> bool {
        self.terminal_error_codes.contains(&code)
    }
}

/// Local capture constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub audio: bool,
    pub video: bool,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// One STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_terminal_error(428));
        assert!(!config.is_terminal_error(426));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let config = ClientConfig {
            display_prefix: String::new(),
            capture: CaptureConfig {
                audio: false,
                video: false,
                ..CaptureConfig::default()
            },
            ice_servers: vec![IceServer {
                urls: vec!["turn:relay.example.com:3478?transport=udp".to_string()],
                username: None,
                credential: None,
            }],
            ..ClientConfig::default()
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }
}
