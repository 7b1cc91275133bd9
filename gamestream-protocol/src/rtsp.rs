//! Session Negotiation Protocol
//!
//! A lightweight RTSP/1.0-style text protocol establishes the media
//! transport after an application launch. The host expects every exchange
//! on its own TCP connection, so the client dials fresh for each request
//! while keeping the sequence number and session identifier across the
//! whole negotiation.
//!
//! Wire shape: a request line `METHOD target RTSP/1.0`, `CSeq`,
//! `X-GS-ClientVersion`, `Session` (once established) and `User-Agent`
//! headers, optional extra headers, a blank line, then an optional body.
//! The response mirrors it: status line, headers until a blank line, and
//! the remaining bytes as body.

use crate::{ClientError, Result};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Default session-negotiation port
pub const DEFAULT_RTSP_PORT: u16 = 48010;

/// Client version the host expects in `X-GS-ClientVersion`
pub const CLIENT_VERSION: &str = "13";

const USER_AGENT: &str = "GameStream Client";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Parsed response from one exchange
#[derive(Debug, Clone)]
pub struct RtspResponse {
    pub status_code: u16,
    pub status_line: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl RtspResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

struct RtspRequest {
    method: &'static str,
    target: String,
    headers: Vec<(&'static str, String)>,
    body: String,
}

impl RtspRequest {
    fn new(method: &'static str, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Session-negotiation client for one launched application
///
/// Created from the session URL the launch request returned; drives the
/// `OPTIONS` / `DESCRIBE` / `SETUP` / `ANNOUNCE` / `PLAY` sequence.
pub struct SessionClient {
    host: String,
    port: u16,
    cseq: u32,
    session_id: Option<String>,
}

impl SessionClient {
    /// Parse a session URL of the form `rtsp://host[:port][?query]`
    pub fn new(session_url: &str) -> Result<Self> {
        let rest = session_url.strip_prefix("rtsp://").ok_or_else(|| {
            ClientError::Protocol(format!("invalid session URL: {session_url}"))
        })?;

        let host_port = rest.split('?').next().unwrap_or(rest);
        let (host, port) = match host_port.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    ClientError::Protocol(format!("invalid session URL port: {port}"))
                })?;
                (host, port)
            }
            None => (host_port, DEFAULT_RTSP_PORT),
        };

        if host.is_empty() {
            return Err(ClientError::Protocol(format!(
                "invalid session URL: {session_url}"
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            cseq: 1,
            session_id: None,
        })
    }

    /// Session identifier returned by the first successful `SETUP`
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Capability probe opening the negotiation
    pub async fn options(&mut self) -> Result<RtspResponse> {
        let req = RtspRequest::new("OPTIONS", "*");
        self.execute(req).await
    }

    /// Fetch the host's session description
    pub async fn describe(&mut self) -> Result<RtspResponse> {
        let req = RtspRequest::new("DESCRIBE", "*")
            .header("Accept", "application/sdp")
            .header("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT");
        self.execute(req).await
    }

    /// Set up one track (`audio/0/0`, `video/0/0`, `control/13/0`)
    ///
    /// The response's `Session` header, stripped at the first `;`, becomes
    /// the session identifier carried by all later requests.
    pub async fn setup(&mut self, track: &str) -> Result<RtspResponse> {
        let req = RtspRequest::new("SETUP", format!("streamid={track}"))
            .header("Transport", "unicast;X-GS-ClientPort=50000-50001")
            .header("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT");
        let resp = self.execute(req).await?;

        if let Some(session) = resp.header("Session") {
            let id = strip_session_id(session);
            debug!(track, session = id, "session established");
            self.session_id = Some(id.to_string());
        }

        Ok(resp)
    }

    /// Declare the local session description
    pub async fn announce(&mut self, sdp: &str) -> Result<RtspResponse> {
        let req = RtspRequest::new("ANNOUNCE", "streamid=control/13/0")
            .header("Content-Type", "application/sdp")
            .body(sdp);
        self.execute(req).await
    }

    /// Start the media flow
    pub async fn play(&mut self) -> Result<RtspResponse> {
        let req = RtspRequest::new("PLAY", "streamid=video");
        self.execute(req).await
    }

    async fn execute(&mut self, req: RtspRequest) -> Result<RtspResponse> {
        let method = req.method;
        let payload = self.render(&req);
        self.cseq += 1;

        debug!(method, target = %req.target, "sending session request");

        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| ClientError::Timeout(format!("connecting to {addr}")))??;

        stream.write_all(payload.as_bytes()).await?;
        stream.flush().await?;

        let resp = timeout(RESPONSE_TIMEOUT, read_response(stream))
            .await
            .map_err(|_| ClientError::Timeout(format!("{method} response from {addr}")))??;

        if resp.status_code != 200 {
            return Err(ClientError::Protocol(format!(
                "{method} failed with status: {}",
                resp.status_line
            )));
        }

        Ok(resp)
    }

    fn render(&self, req: &RtspRequest) -> String {
        let mut out = String::new();
        out.push_str(&format!("{} {} RTSP/1.0\r\n", req.method, req.target));
        out.push_str(&format!("CSeq: {}\r\n", self.cseq));
        out.push_str(&format!("X-GS-ClientVersion: {CLIENT_VERSION}\r\n"));
        if let Some(session) = &self.session_id {
            out.push_str(&format!("Session: {session}\r\n"));
        }
        out.push_str(&format!("User-Agent: {USER_AGENT}\r\n"));
        for (name, value) in &req.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        if !req.body.is_empty() {
            out.push_str(&format!("Content-Length: {}\r\n", req.body.len()));
        }
        out.push_str("\r\n");
        out.push_str(&req.body);
        out
    }
}

/// The session identifier is the `Session` header up to the first `;`
fn strip_session_id(header: &str) -> &str {
    header.split(';').next().unwrap_or(header).trim()
}

async fn read_response(stream: TcpStream) -> Result<RtspResponse> {
    let mut reader = BufReader::new(stream);

    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    let status_line = status_line.trim_end_matches(['\r', '\n']).to_string();

    let status_code = parse_status_line(&status_line)?;

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        let line = line.trim_end_matches(['\r', '\n']);
        if read == 0 || line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    let mut body = Vec::new();
    reader.read_to_end(&mut body).await?;

    Ok(RtspResponse {
        status_code,
        status_line,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn parse_status_line(line: &str) -> Result<u16> {
    let mut parts = line.splitn(3, ' ');
    let _protocol = parts
        .next()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ClientError::Protocol(format!("invalid status line: {line}")))?;
    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| ClientError::Protocol(format!("invalid status line: {line}")))?;
    Ok(code)
}
