//! Session configuration
//!
//! Everything the original deployment hard-coded at module level (rendezvous
//! URL, STUN list, capture defaults) lives in an explicit config struct so
//! tests can substitute loopback collaborators.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::video::format::Resolution;
use crate::video::source::{FrameSourceSpec, SourceKind, StreamSelect};

/// Default rendezvous endpoint for signaling
pub const DEFAULT_SIGNALING_URL: &str = "wss://readytoserve.online/ws";

/// Default STUN endpoints handed to the transport
pub fn default_stun_servers() -> Vec<String> {
    [
        "stun:stun.l.google.com:19302",
        "stun:stun.l.google.com:5349",
        "stun:stun1.l.google.com:3478",
        "stun:stun1.l.google.com:5349",
        "stun:stun2.l.google.com:19302",
        "stun:stun2.l.google.com:5349",
        "stun:stun3.l.google.com:3478",
        "stun:stun3.l.google.com:5349",
        "stun:stun4.l.google.com:19302",
        "stun:stun4.l.google.com:5349",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Peer role, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Video source, command sink
    Robot,
    /// Video sink, command source
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Robot => write!(f, "robot"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "robot" => Ok(Role::Robot),
            "operator" => Ok(Role::Operator),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Camera selection for the robot role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraChoice {
    /// Plain color camera (webcam, wrist camera)
    #[default]
    Rgb,
    /// Color stream of a depth+color sensor
    RealsenseRgb,
    /// Depth stream of a depth+color sensor, colorized for viewing
    RealsenseDepth,
}

impl fmt::Display for CameraChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraChoice::Rgb => write!(f, "rgb"),
            CameraChoice::RealsenseRgb => write!(f, "realsense-rgb"),
            CameraChoice::RealsenseDepth => write!(f, "realsense-depth"),
        }
    }
}

impl FromStr for CameraChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "rgb" => Ok(CameraChoice::Rgb),
            "realsense-rgb" => Ok(CameraChoice::RealsenseRgb),
            "realsense-depth" => Ok(CameraChoice::RealsenseDepth),
            _ => Err(format!("Unknown camera type: {}", s)),
        }
    }
}

/// Session configuration passed into RoleController construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Rendezvous WebSocket URL
    pub signaling_url: String,
    /// STUN server URLs for the transport
    pub stun_servers: Vec<String>,
    /// Camera to stream (robot role only)
    pub camera: CameraChoice,
    /// Device index for plain color cameras
    pub camera_index: u32,
    /// Desired capture resolution
    pub resolution: Resolution,
    /// Target frame rate
    pub fps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            stun_servers: default_stun_servers(),
            camera: CameraChoice::Rgb,
            camera_index: 0,
            resolution: Resolution::VGA,
            fps: 30,
        }
    }
}

impl SessionConfig {
    /// Set the signaling URL
    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    /// Set the STUN server list
    pub fn with_stun_servers(mut self, servers: Vec<String>) -> Self {
        self.stun_servers = servers;
        self
    }

    /// Set the camera choice
    pub fn with_camera(mut self, camera: CameraChoice) -> Self {
        self.camera = camera;
        self
    }

    /// Set the camera device index
    pub fn with_camera_index(mut self, index: u32) -> Self {
        self.camera_index = index;
        self
    }

    /// Set capture resolution
    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.resolution = Resolution::new(width, height);
        self
    }

    /// Set target frame rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Build the frame source spec for the configured camera
    pub fn source_spec(&self) -> FrameSourceSpec {
        let (kind, selector) = match self.camera {
            CameraChoice::Rgb => (SourceKind::Rgb, StreamSelect::Color),
            CameraChoice::RealsenseRgb => (SourceKind::DepthColorPair, StreamSelect::Color),
            CameraChoice::RealsenseDepth => {
                (SourceKind::DepthColorPair, StreamSelect::DepthVisualized)
            }
        };

        FrameSourceSpec {
            kind,
            selector,
            device_index: self.camera_index,
            resolution: self.resolution,
            target_fps: self.fps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("robot".parse::<Role>().unwrap(), Role::Robot);
        assert_eq!("OPERATOR".parse::<Role>().unwrap(), Role::Operator);
        assert!("viewer".parse::<Role>().is_err());
    }

    #[test]
    fn test_camera_parse_accepts_underscores() {
        assert_eq!(
            "realsense_depth".parse::<CameraChoice>().unwrap(),
            CameraChoice::RealsenseDepth
        );
        assert_eq!(
            "realsense-rgb".parse::<CameraChoice>().unwrap(),
            CameraChoice::RealsenseRgb
        );
    }

    #[test]
    fn test_source_spec_mapping() {
        let config = SessionConfig::default().with_camera(CameraChoice::RealsenseDepth);
        let spec = config.source_spec();
        assert_eq!(spec.kind, SourceKind::DepthColorPair);
        assert_eq!(spec.selector, StreamSelect::DepthVisualized);

        let config = SessionConfig::default();
        let spec = config.source_spec();
        assert_eq!(spec.kind, SourceKind::Rgb);
        assert_eq!(spec.selector, StreamSelect::Color);
    }

    #[test]
    fn test_defaults_match_deployment() {
        let config = SessionConfig::default();
        assert_eq!(config.resolution, Resolution::VGA);
        assert_eq!(config.fps, 30);
        assert_eq!(config.stun_servers.len(), 10);
    }
}
