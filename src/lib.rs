//! teleop-link - WebRTC robot teleoperation link
//!
//! A robot peer streams paced camera video and executes received
//! commands; an operator peer watches the video and sends the commands.
//! Session setup runs over a shared WebSocket signaling pipe carrying
//! offer/answer/candidate envelopes.

pub mod config;
pub mod controller;
pub mod error;
pub mod video;
pub mod webrtc;

pub use config::{CameraChoice, Role, SessionConfig};
pub use controller::RoleController;
pub use error::{AppError, Result};
