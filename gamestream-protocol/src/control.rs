//! Host Control Protocol
//!
//! HTTP(S) client for the host's control plane: capability query,
//! application enumeration, launch/quit and the raw pairing command
//! primitives consumed by the pairing manager.
//!
//! Two planes exist side by side. The plain-HTTP plane (port 47989)
//! carries the pairing exchanges that must work before any trust is
//! established; the HTTPS plane (port 47984) authenticates the client
//! with its certificate and carries everything that requires a paired
//! relationship. The host's certificate is self-signed, so transport-level
//! chain validation is not possible — trust comes from the pairing
//! signature protocol, and app-control calls are refused until a
//! pairing-verified host certificate is present.
//!
//! Every response is an XML document; a non-success HTTP status or an
//! undecodable document is a protocol error.

use crate::config::{RemoteInputKey, StreamConfiguration};
use crate::identity::{ClientIdentity, ServerCertificate};
use crate::{ClientError, Result};
use serde::Deserialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Control-plane HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 47989;

/// Mutually-authenticated HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 47984;

/// Device name reported to the host on pairing requests
pub const DEVICE_NAME: &str = "roth";

/// Capability and status report from `/serverinfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub hostname: String,
    #[serde(rename = "appversion", default)]
    pub app_version: String,
    #[serde(rename = "GfeVersion", default)]
    pub gfe_version: String,
    #[serde(rename = "uniqueid", default)]
    pub unique_id: String,
    #[serde(rename = "HttpsPort", default)]
    pub https_port: u16,
    #[serde(rename = "ExternalPort", default)]
    pub external_port: u16,
    #[serde(rename = "MaxLumaPixelsHEVC", default)]
    pub max_luma_pixels_hevc: u64,
    #[serde(rename = "mac", default)]
    pub mac: String,
    #[serde(rename = "LocalIP", default)]
    pub local_ip: String,
    #[serde(rename = "ServerCodecModeSupport", default)]
    pub server_codec_mode_support: u32,
    #[serde(rename = "PairStatus", default)]
    pub pair_status: u32,
    #[serde(rename = "currentgame", default)]
    pub current_game: u32,
    #[serde(default)]
    pub state: String,
}

impl ServerInfo {
    pub fn is_paired(&self) -> bool {
        self.pair_status == 1
    }

    /// 4K support heuristic: absent or 2.x GFE versions cannot stream 4K
    pub fn supports_4k(&self) -> bool {
        !(self.gfe_version.is_empty() || self.gfe_version.starts_with("2."))
    }
}

/// One launchable application from `/applist`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct App {
    #[serde(rename = "ID")]
    pub id: u32,
    #[serde(rename = "AppTitle")]
    pub title: String,
    #[serde(rename = "IsHdrSupported", default)]
    hdr_supported: u8,
}

impl App {
    pub fn is_hdr_supported(&self) -> bool {
        self.hdr_supported == 1
    }
}

#[derive(Debug, Deserialize)]
struct AppListDocument {
    #[serde(rename = "App", default)]
    apps: Vec<App>,
}

#[derive(Debug, Deserialize)]
struct LaunchDocument {
    #[serde(rename = "sessionUrl0", default)]
    session_url: String,
    #[serde(rename = "gamesession", default)]
    game_session: u32,
}

#[derive(Debug, Deserialize)]
struct CancelDocument {
    #[serde(default)]
    cancel: u32,
}

/// Response document for the `/pair` exchanges
#[derive(Debug, Clone, Deserialize)]
pub struct PairResponse {
    #[serde(default)]
    pub paired: u32,
    #[serde(rename = "plaincert", default)]
    pub plain_cert: String,
    #[serde(rename = "challengeresponse", default)]
    pub challenge_response: String,
    #[serde(rename = "pairingsecret", default)]
    pub pairing_secret: String,
}

/// Stateless-per-call client for the host control protocol
///
/// Holds the client identity, the pairing-verified host certificate (when
/// paired) and a cache of the last capability report; every operation is a
/// single request/response.
pub struct ControlClient {
    host: String,
    http_port: u16,
    https_port: u16,
    device_name: String,
    identity: Arc<ClientIdentity>,
    server_cert: RwLock<Option<ServerCertificate>>,
    info: Mutex<Option<ServerInfo>>,
    http: reqwest::Client,
    https: reqwest::Client,
}

impl ControlClient {
    /// Client for a host on the default control ports
    pub fn new(identity: Arc<ClientIdentity>, host: impl Into<String>) -> Result<Self> {
        Self::with_ports(identity, host, DEFAULT_HTTP_PORT, DEFAULT_HTTPS_PORT)
    }

    /// Client with explicit ports (tests, port-forwarded hosts)
    pub fn with_ports(
        identity: Arc<ClientIdentity>,
        host: impl Into<String>,
        http_port: u16,
        https_port: u16,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;

        // The host presents a self-signed certificate; chain validation is
        // replaced by the pairing signature check at the protocol layer.
        let https = reqwest::Client::builder()
            .use_rustls_tls()
            .identity(reqwest::Identity::from_pem(&identity.identity_pem())?)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            host: host.into(),
            http_port,
            https_port,
            device_name: DEVICE_NAME.to_string(),
            identity,
            server_cert: RwLock::new(None),
            info: Mutex::new(None),
            http,
            https,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn unique_id(&self) -> &str {
        self.identity.unique_id()
    }

    /// Install the pairing-verified host certificate
    pub fn set_server_certificate(&self, cert: ServerCertificate) {
        *self.server_cert.write().unwrap_or_else(|e| e.into_inner()) = Some(cert);
    }

    /// The currently trusted host certificate, if paired
    pub fn server_certificate(&self) -> Option<ServerCertificate> {
        self.server_cert
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn require_server_certificate(&self) -> Result<()> {
        if self.server_certificate().is_none() {
            return Err(ClientError::NotPaired);
        }
        Ok(())
    }

    fn https_url(&self, path: &str) -> String {
        format!("https://{}:{}{}", self.host, self.https_port, path)
    }

    fn http_url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.http_port, path)
    }

    /// Fetch the host's capability and pairing status report
    ///
    /// The result is cached and gates [`ControlClient::launch`].
    pub async fn server_info(&self) -> Result<ServerInfo> {
        let response = self
            .https
            .get(self.https_url("/serverinfo"))
            .query(&[("uniqueid", self.unique_id())])
            .send()
            .await?;

        let info: ServerInfo = parse_document(response).await?;
        debug!(
            host = %self.host,
            paired = info.is_paired(),
            codec_modes = info.server_codec_mode_support,
            "fetched server info"
        );

        *self.info.lock().unwrap_or_else(|e| e.into_inner()) = Some(info.clone());
        Ok(info)
    }

    /// Enumerate the applications the host can launch
    pub async fn app_list(&self) -> Result<Vec<App>> {
        self.require_server_certificate()?;

        let response = self
            .https
            .get(self.https_url("/applist"))
            .query(&[("uniqueid", self.unique_id())])
            .send()
            .await?;

        let doc: AppListDocument = parse_document(response).await?;
        Ok(doc.apps)
    }

    /// Launch an application, returning the session URL for negotiation
    ///
    /// Fails with a state error if capability info was never fetched and
    /// with [`ClientError::NotPaired`] if the host is not paired.
    pub async fn launch(
        &self,
        app_id: u32,
        config: &StreamConfiguration,
        enable_hdr: bool,
        remote_input: &RemoteInputKey,
    ) -> Result<String> {
        self.require_server_certificate()?;

        let paired = {
            let info = self.info.lock().unwrap_or_else(|e| e.into_inner());
            let info = info.as_ref().ok_or_else(|| {
                ClientError::State("capability info not fetched before launch".to_string())
            })?;
            info.is_paired()
        };
        if !paired {
            return Err(ClientError::NotPaired);
        }

        let mode = format!(
            "{}x{}x{}",
            config.width, config.height, config.launch_refresh_rate
        );
        info!(app_id, mode = %mode, "launching application");

        let mut query: Vec<(&str, String)> = vec![
            ("uniqueid", self.unique_id().to_string()),
            ("appid", app_id.to_string()),
            ("mode", mode),
            ("additionalStates", "1".to_string()),
            ("sops", if config.sops { "1" } else { "0" }.to_string()),
            ("rikey", hex::encode(remote_input.key)),
            ("rikeyid", hex::encode(remote_input.iv)),
        ];

        if enable_hdr {
            query.push(("hdrMode", "1".to_string()));
            query.push(("clientHdrCapVersion", "0".to_string()));
            query.push(("clientHdrCapSupportedFlagsInUint32", "0".to_string()));
            query.push((
                "clientHdrCapMetaDataId",
                "NV_STATIC_METADATA_TYPE_1".to_string(),
            ));
            query.push((
                "clientHdrCapDisplayData",
                "0x0x0x0x0x0x0x0x0x0x0".to_string(),
            ));
        }

        query.push((
            "localAudioPlayMode",
            if config.play_local_audio { "1" } else { "0" }.to_string(),
        ));
        query.push((
            "surroundAudioInfo",
            config.audio.surround_audio_info().to_string(),
        ));
        query.push(("remoteControllersBitmap", config.gamepad_mask.to_string()));
        query.push(("gcmap", config.gamepad_mask.to_string()));
        query.push((
            "gcpersist",
            if config.persist_gamepads { "1" } else { "0" }.to_string(),
        ));
        query.push(("corever", "1".to_string()));

        let response = self
            .https
            .get(self.https_url("/launch"))
            .query(&query)
            .send()
            .await?;

        let doc: LaunchDocument = parse_document(response).await?;
        if doc.game_session != 1 {
            return Err(ClientError::Protocol(
                "host declined to launch the application".to_string(),
            ));
        }

        Ok(doc.session_url)
    }

    /// Terminate the running session on the host
    pub async fn quit(&self) -> Result<()> {
        self.require_server_certificate()?;

        let response = self
            .https
            .get(self.https_url("/cancel"))
            .query(&[("uniqueid", self.unique_id())])
            .send()
            .await?;

        let doc: CancelDocument = parse_document(response).await?;
        if doc.cancel != 1 {
            return Err(ClientError::Protocol(
                "host declined to quit the running session".to_string(),
            ));
        }

        Ok(())
    }

    /// One pairing-phase exchange on the plain-HTTP plane
    ///
    /// Carries the baseline identification fields plus the phase-specific
    /// arguments. A `paired != 1` response is an authentication error.
    pub(crate) async fn pair_command(
        &self,
        args: &[(&str, String)],
        timeout: Option<Duration>,
    ) -> Result<PairResponse> {
        let mut query: Vec<(&str, String)> = vec![
            ("uniqueid", self.unique_id().to_string()),
            ("devicename", self.device_name.clone()),
            ("updateState", "1".to_string()),
        ];
        query.extend(args.iter().cloned());

        let mut request = self.http.get(self.http_url("/pair")).query(&query);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let resp: PairResponse = parse_document(request.send().await?).await?;
        if resp.paired != 1 {
            return Err(ClientError::Authentication(
                "host reported unpaired state during pairing".to_string(),
            ));
        }
        Ok(resp)
    }

    /// Final pairing confirmation over the mutually-authenticated plane
    pub(crate) async fn pair_challenge(&self, timeout: Duration) -> Result<PairResponse> {
        let query: Vec<(&str, String)> = vec![
            ("uniqueid", self.unique_id().to_string()),
            ("devicename", self.device_name.clone()),
            ("updateState", "1".to_string()),
            ("phrase", "pairchallenge".to_string()),
        ];

        let response = self
            .https
            .get(self.https_url("/pair"))
            .query(&query)
            .timeout(timeout)
            .send()
            .await?;

        let resp: PairResponse = parse_document(response).await?;
        if resp.paired != 1 {
            return Err(ClientError::Authentication(
                "host rejected the pairing challenge".to_string(),
            ));
        }
        Ok(resp)
    }

    /// Clear any half-finished pairing state on the host
    pub(crate) async fn unpair(&self) -> Result<()> {
        let response = self
            .http
            .get(self.http_url("/unpair"))
            .query(&[("uniqueid", self.unique_id())])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "unpair request rejected");
            return Err(ClientError::Protocol(format!(
                "HTTP request failed with status: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

async fn parse_document<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Protocol(format!(
            "HTTP request failed with status: {status}"
        )));
    }

    let text = response.text().await?;
    Ok(quick_xml::de::from_str(&text)?)
}
