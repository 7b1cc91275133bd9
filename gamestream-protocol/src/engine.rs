//! Streaming Engine Boundary
//!
//! The actual media transport — RTP reception, FEC reconstruction and
//! codec decode — lives in an external native engine. This module defines
//! the seam: the engine is handed an explicit [`SessionContext`] at open
//! time and pushes decoded units into the context's sinks from its own
//! callback threads. Nothing is resolved through ambient or global state.

use crate::config::{RemoteInputKey, StreamConfiguration, StreamingMode};
use crate::media::{AudioSink, VideoSink};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Negotiated parameters describing one live session
#[derive(Debug, Clone)]
pub struct NegotiatedSession {
    /// Host address the transport connects to
    pub address: String,
    /// Host application version string
    pub app_version: String,
    /// Host GFE version string, possibly empty
    pub gfe_version: String,
    /// Host codec-support bitmask
    pub server_codec_mode_support: u32,
    /// Session URL returned by the launch request
    pub session_url: String,
    /// Packet size after remote-mode negotiation
    pub packet_size: u32,
    /// Whether the stream was negotiated as remote
    pub mode: StreamingMode,
}

/// Everything the engine needs for one session, passed explicitly
///
/// Constructed at session start and shared by reference with every
/// callback-invoking call; dropped when the session stops.
pub struct SessionContext {
    pub session: NegotiatedSession,
    pub config: StreamConfiguration,
    pub remote_input: RemoteInputKey,
    pub video: Arc<VideoSink>,
    pub audio: Arc<AudioSink>,
}

/// Failures at the engine boundary
#[derive(Error, Debug)]
pub enum EngineError {
    /// Close was requested but no transport is open
    #[error("engine has no open transport")]
    NotRunning,
    /// The engine failed to open or tear down the transport
    #[error("engine failure: {0}")]
    Failed(String),
}

/// External streaming engine seam
///
/// `open` connects the media transport for the given session and begins
/// delivering decoded units into the context's sinks; `close` interrupts
/// and tears the transport down.
#[async_trait]
pub trait StreamingEngine: Send + Sync {
    async fn open(&self, context: &SessionContext) -> Result<(), EngineError>;
    async fn close(&self) -> Result<(), EngineError>;
}
