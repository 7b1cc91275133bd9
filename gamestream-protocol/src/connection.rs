//! Session Lifecycle Orchestration
//!
//! The connection manager is the sole owner of session lifecycle. It
//! validates the requested stream against the host's advertised
//! capabilities before touching the host, launches the application,
//! opens the external engine's transport and hands the caller a handle
//! to the media sinks. Capability violations fail fast — no partial
//! launch ever reaches the host.
//!
//! Lifecycle: `Idle → Starting → Active → Stopping → Idle`. `start` from
//! any state but `Idle` is rejected; `stop` is safe from any state,
//! including after a `start` that never completed.

use crate::config::{RemoteInputKey, StreamConfiguration, StreamingMode};
use crate::control::{App, ControlClient, ServerInfo};
use crate::engine::{EngineError, NegotiatedSession, SessionContext, StreamingEngine};
use crate::media::{
    AudioSink, VideoSink, DEFAULT_AUDIO_SINK_CAPACITY, DEFAULT_VIDEO_SINK_CAPACITY,
};
use crate::{ClientError, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Codec-support bits required for 10-bit (HDR) streaming
const SCM_HDR_SUPPORT: u32 = 0x20200;

/// Codec-support bit advertising resolutions above 4096 pixels
const SCM_EXTENDED_RESOLUTION: u32 = 0x200;

/// Packet size forced when streaming remotely, to stay under path MTU
const REMOTE_PACKET_SIZE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Handle to a running session
///
/// Owns the sink registration created at start; the consumer drains the
/// sinks through it. The manager closes both sinks when the session stops.
pub struct SessionHandle {
    context: Arc<SessionContext>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn session(&self) -> &NegotiatedSession {
        &self.context.session
    }

    pub fn video(&self) -> &Arc<VideoSink> {
        &self.context.video
    }

    pub fn audio(&self) -> &Arc<AudioSink> {
        &self.context.audio
    }
}

/// Owns session start/stop against one host
pub struct ConnectionManager {
    control: Arc<ControlClient>,
    engine: Arc<dyn StreamingEngine>,
    state: Mutex<Lifecycle>,
    current: Mutex<Option<Arc<SessionContext>>>,
    video_capacity: usize,
    audio_capacity: usize,
}

impl ConnectionManager {
    pub fn new(control: Arc<ControlClient>, engine: Arc<dyn StreamingEngine>) -> Self {
        Self {
            control,
            engine,
            state: Mutex::new(Lifecycle::Idle),
            current: Mutex::new(None),
            video_capacity: DEFAULT_VIDEO_SINK_CAPACITY,
            audio_capacity: DEFAULT_AUDIO_SINK_CAPACITY,
        }
    }

    /// Override the sink capacities for this manager
    pub fn with_sink_capacities(mut self, video: usize, audio: usize) -> Self {
        self.video_capacity = video;
        self.audio_capacity = audio;
        self
    }

    /// Launch `app` and open the media transport
    ///
    /// Validates the stream configuration against the host capability
    /// report, negotiates the packet size, launches the application and
    /// opens the engine transport. On any failure the manager returns to
    /// `Idle` with nothing launched or half-open.
    pub async fn start(
        &self,
        app: &App,
        config: StreamConfiguration,
    ) -> Result<SessionHandle> {
        self.transition_to_starting()?;

        match self.start_inner(app, config).await {
            Ok(handle) => {
                *self.lock_state() = Lifecycle::Active;
                Ok(handle)
            }
            Err(e) => {
                *self.lock_state() = Lifecycle::Idle;
                Err(e)
            }
        }
    }

    async fn start_inner(
        &self,
        app: &App,
        config: StreamConfiguration,
    ) -> Result<SessionHandle> {
        let info = self.control.server_info().await?;
        if !info.is_paired() {
            return Err(ClientError::NotPaired);
        }

        validate_stream(&info, &config)?;

        let (mode, packet_size) = negotiate_packet_size(&config);
        let enable_hdr = config.requests_hdr();

        // Fresh input-encryption material per session
        let remote_input = RemoteInputKey::generate()?;

        let session_url = self
            .control
            .launch(app.id, &config, enable_hdr, &remote_input)
            .await?;

        info!(
            app = %app.title,
            session_url = %session_url,
            packet_size,
            "application launched"
        );

        let session = NegotiatedSession {
            address: self.control.host().to_string(),
            app_version: info.app_version.clone(),
            gfe_version: info.gfe_version.clone(),
            server_codec_mode_support: info.server_codec_mode_support,
            session_url,
            packet_size,
            mode,
        };

        let context = Arc::new(SessionContext {
            session,
            config,
            remote_input,
            video: Arc::new(VideoSink::new(self.video_capacity)),
            audio: Arc::new(AudioSink::new(self.audio_capacity)),
        });

        self.engine
            .open(&context)
            .await
            .map_err(|e| ClientError::Transport(format!("engine open failed: {e}")))?;

        *self.lock_current() = Some(Arc::clone(&context));
        Ok(SessionHandle { context })
    }

    /// Stop the session and quit the application on the host
    ///
    /// Safe to call from any state, including when `start` never
    /// completed: the engine transport is unconditionally interrupted and
    /// an engine with nothing to stop is not an error.
    pub async fn stop(&self) -> Result<()> {
        *self.lock_state() = Lifecycle::Stopping;

        match self.engine.close().await {
            Ok(()) => {}
            Err(EngineError::NotRunning) => {
                debug!("engine had no open transport to close");
            }
            Err(e) => {
                warn!("engine close failed: {e}");
            }
        }

        if let Some(context) = self.lock_current().take() {
            context.video.close();
            context.audio.close();
        }

        let result = self.control.quit().await;
        *self.lock_state() = Lifecycle::Idle;
        result
    }

    /// Whether a session is currently active
    pub fn is_active(&self) -> bool {
        *self.lock_state() == Lifecycle::Active
    }

    fn transition_to_starting(&self) -> Result<()> {
        let mut state = self.lock_state();
        if *state != Lifecycle::Idle {
            return Err(ClientError::State("session already active".to_string()));
        }
        *state = Lifecycle::Starting;
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<SessionContext>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reject configurations the host cannot serve, before any host mutation
fn validate_stream(info: &ServerInfo, config: &StreamConfiguration) -> Result<()> {
    if config.requests_hdr() && info.server_codec_mode_support & SCM_HDR_SUPPORT == 0 {
        return Err(ClientError::Capability(
            "host does not support HDR streaming".to_string(),
        ));
    }

    if config.width > 4096 || config.height > 4096 {
        if info.server_codec_mode_support & SCM_EXTENDED_RESOLUTION == 0 {
            return Err(ClientError::Capability(
                "host does not support resolutions above 4096 pixels".to_string(),
            ));
        }
        if config.is_h264_only() {
            return Err(ClientError::Capability(
                "resolutions above 4096 pixels require a codec beyond H.264".to_string(),
            ));
        }
    }

    if config.width > 2160 && !info.supports_4k() {
        return Err(ClientError::Capability(
            "host does not advertise 4K support".to_string(),
        ));
    }

    debug!(
        width = config.width,
        height = config.height,
        formats = config.supported_video_formats,
        "stream configuration accepted"
    );
    Ok(())
}

/// Remote streams are capped at 1024-byte packets to dodge MTU trouble
fn negotiate_packet_size(config: &StreamConfiguration) -> (StreamingMode, u32) {
    match config.mode {
        StreamingMode::Remote => (StreamingMode::Remote, REMOTE_PACKET_SIZE),
        mode => (mode, config.packet_size),
    }
}
