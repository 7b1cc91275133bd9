//! GameStream Protocol Implementation
//!
//! This library provides a pure Rust client for the GameStream remote-play
//! control protocol: first-time cryptographic pairing with a streaming
//! host, the HTTP(S) control plane (capability query, application list,
//! launch and quit), the RTSP-style session negotiation that establishes
//! the media transport, and bounded media sinks that hand decoded units
//! from the external streaming engine to a renderer.
//!
//! The actual codec decode and RTP transport are delegated to an external
//! engine behind the [`StreamingEngine`] trait; this crate owns everything
//! up to and including that boundary.

pub mod config;
pub mod connection;
pub mod control;
pub mod engine;
pub mod identity;
pub mod media;
pub mod pairing;
pub mod rtsp;

mod error;

pub use config::{
    AudioConfiguration, ColorRange, ColorSpace, RemoteInputKey, StreamConfiguration,
    StreamingMode,
};
pub use connection::{ConnectionManager, SessionHandle};
pub use control::{App, ControlClient, PairResponse, ServerInfo};
pub use engine::{EngineError, NegotiatedSession, SessionContext, StreamingEngine};
pub use error::{ClientError, Result};
pub use identity::{ClientIdentity, IdentityStore, ServerCertificate};
pub use media::{AudioSink, BufferKind, BufferSegment, FrameKind, MediaSink, MediaUnit, VideoSink};
pub use pairing::{PairState, PairingManager};
pub use rtsp::{RtspResponse, SessionClient};
