//! Session transport configuration

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

use crate::config::default_stun_servers;

/// Transport-level configuration: STUN only, no TURN credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfig {
    /// STUN server URLs
    pub stun_servers: Vec<String>,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
        }
    }
}

impl WebRtcConfig {
    pub fn new(stun_servers: Vec<String>) -> Self {
        Self { stun_servers }
    }

    /// Build the RTCConfiguration handed to the peer connection
    pub fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.stun_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }]
        };

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_carries_stun_list() {
        let config = WebRtcConfig::default();
        assert_eq!(config.stun_servers.len(), 10);

        let rtc = config.rtc_configuration();
        assert_eq!(rtc.ice_servers.len(), 1);
        assert_eq!(rtc.ice_servers[0].urls.len(), 10);
    }

    #[test]
    fn test_empty_list_means_no_ice_servers() {
        let rtc = WebRtcConfig::new(vec![]).rtc_configuration();
        assert!(rtc.ice_servers.is_empty());
    }
}
