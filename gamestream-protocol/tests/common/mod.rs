//! Mock GameStream host for integration tests
//!
//! Implements the host side of the pairing handshake, the control plane
//! and the session-negotiation protocol: a plain-HTTP listener for the
//! pairing plane, a TLS listener for the control plane and a TCP listener
//! speaking the RTSP-style text protocol. State is shared so tests can
//! preconfigure pairing status and inspect what the client sent.

#![allow(dead_code)]

use gamestream_protocol::pairing::crypto;
use gamestream_protocol::{ClientIdentity, ServerCertificate};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// Session identifier handed out by SETUP responses
pub const MOCK_SESSION_ID: &str = "AAAABBBB";

struct PairingAttempt {
    aes_key: [u8; 16],
    client_cert: ServerCertificate,
    server_challenge: [u8; 16],
    server_secret: [u8; 16],
}

pub struct HostState {
    pub identity: ClientIdentity,
    pub pin: String,
    pub paired: bool,
    pub busy: bool,
    /// Corrupt the signature over the host secret (foreign-host simulation)
    pub tamper_secret_signature: bool,
    pub gfe_version: String,
    pub codec_modes: u32,
    pub rtsp_port: u16,
    pub launch_queries: Vec<String>,
    pub cancel_requests: usize,
    pub unpair_requests: usize,
    /// (method, Session header) per RTSP request
    pub rtsp_log: Vec<(String, Option<String>)>,
    attempt: Option<PairingAttempt>,
}

pub struct MockHost {
    pub http_port: u16,
    pub https_port: u16,
    pub rtsp_port: u16,
    pub state: Arc<Mutex<HostState>>,
}

impl MockHost {
    pub async fn start(pin: &str) -> Self {
        let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let https_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rtsp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let http_port = http_listener.local_addr().unwrap().port();
        let https_port = https_listener.local_addr().unwrap().port();
        let rtsp_port = rtsp_listener.local_addr().unwrap().port();

        let state = Arc::new(Mutex::new(HostState {
            identity: ClientIdentity::generate(0, 1024).unwrap(),
            pin: pin.to_string(),
            paired: false,
            busy: false,
            tamper_secret_signature: false,
            gfe_version: "3.23.0.74".to_string(),
            codec_modes: 0x10203,
            rtsp_port,
            launch_queries: Vec::new(),
            cancel_requests: 0,
            unpair_requests: 0,
            rtsp_log: Vec::new(),
            attempt: None,
        }));

        tokio::spawn(serve_plain(http_listener, Arc::clone(&state)));
        tokio::spawn(serve_tls(https_listener, Arc::clone(&state)));
        tokio::spawn(serve_rtsp(rtsp_listener, Arc::clone(&state)));

        Self {
            http_port,
            https_port,
            rtsp_port,
            state,
        }
    }

    pub fn host_cert_pem(&self) -> Vec<u8> {
        self.state.lock().unwrap().identity.cert_pem().to_vec()
    }

    pub fn host_certificate(&self) -> ServerCertificate {
        ServerCertificate::from_pem(&self.host_cert_pem()).unwrap()
    }

    pub fn set_paired(&self, paired: bool) {
        self.state.lock().unwrap().paired = paired;
    }
}

async fn serve_plain(listener: TcpListener, state: Arc<Mutex<HostState>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let _ = handle_http(stream, state).await;
        });
    }
}

async fn serve_tls(listener: TcpListener, state: Arc<Mutex<HostState>>) {
    let acceptor = tls_acceptor();
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let acceptor = acceptor.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Ok(tls) = acceptor.accept(stream).await {
                let _ = handle_http(tls, state).await;
            }
        });
    }
}

fn tls_acceptor() -> TlsAcceptor {
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .unwrap();

    let cert_der = cert.der().clone();
    let key_der = rustls::pki_types::PrivateKeyDer::Pkcs8(
        rustls::pki_types::PrivatePkcs8KeyDer::from(key_pair.serialize_der()),
    );

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::ALL_VERSIONS)
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

async fn handle_http<S>(stream: S, state: Arc<Mutex<HostState>>) -> std::io::Result<()>
where
    S: tokio::io::AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain headers
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 || line.trim_end().is_empty() {
            break;
        }
    }

    let target = request_line.split_whitespace().nth(1).unwrap_or("/");
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    let body = dispatch(path, query, &state);

    let mut stream = reader.into_inner();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

fn query_value<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

fn dispatch(path: &str, query: &str, state: &Arc<Mutex<HostState>>) -> String {
    let mut state = state.lock().unwrap();
    match path {
        "/serverinfo" => format!(
            "<root status_code=\"200\"><hostname>mockhost</hostname>\
             <appversion>7.1.431.0</appversion>\
             <GfeVersion>{}</GfeVersion>\
             <ServerCodecModeSupport>{}</ServerCodecModeSupport>\
             <PairStatus>{}</PairStatus>\
             <currentgame>0</currentgame>\
             <state>SERVER_FREE</state></root>",
            state.gfe_version,
            state.codec_modes,
            u32::from(state.paired)
        ),
        "/applist" => "<root status_code=\"200\">\
             <App><IsHdrSupported>1</IsHdrSupported><AppTitle>Steam</AppTitle><ID>1234</ID></App>\
             <App><IsHdrSupported>0</IsHdrSupported><AppTitle>Desktop</AppTitle><ID>2</ID></App>\
             </root>"
            .to_string(),
        "/launch" => {
            state.launch_queries.push(query.to_string());
            format!(
                "<root status_code=\"200\">\
                 <sessionUrl0>rtsp://127.0.0.1:{}</sessionUrl0>\
                 <gamesession>1</gamesession></root>",
                state.rtsp_port
            )
        }
        "/cancel" => {
            state.cancel_requests += 1;
            "<root status_code=\"200\"><cancel>1</cancel></root>".to_string()
        }
        "/unpair" => {
            state.unpair_requests += 1;
            state.busy = false;
            state.attempt = None;
            "<root status_code=\"200\"></root>".to_string()
        }
        "/pair" => handle_pair(query, &mut state),
        _ => "<root status_code=\"404\"></root>".to_string(),
    }
}

fn pair_failure() -> String {
    "<root status_code=\"400\"><paired>0</paired></root>".to_string()
}

fn handle_pair(query: &str, state: &mut HostState) -> String {
    if query_value(query, "phrase") == Some("getservercert") {
        if state.busy {
            return "<root status_code=\"200\"><paired>1</paired></root>".to_string();
        }

        let Some(salt) = query_value(query, "salt").and_then(|s| hex::decode(s).ok()) else {
            return pair_failure();
        };
        let Some(client_cert) = query_value(query, "clientcert")
            .and_then(|c| hex::decode(c).ok())
            .and_then(|pem| ServerCertificate::from_pem(&pem).ok())
        else {
            return pair_failure();
        };

        state.busy = true;
        state.attempt = Some(PairingAttempt {
            aes_key: crypto::derive_pairing_key(&salt, &state.pin),
            client_cert,
            server_challenge: crypto::random_bytes().unwrap(),
            server_secret: crypto::random_bytes().unwrap(),
        });

        return format!(
            "<root status_code=\"200\"><paired>1</paired><plaincert>{}</plaincert></root>",
            hex::encode(state.identity.cert_pem())
        );
    }

    if query_value(query, "phrase") == Some("pairchallenge") {
        return format!(
            "<root status_code=\"200\"><paired>{}</paired></root>",
            u32::from(state.paired)
        );
    }

    if let Some(challenge) = query_value(query, "clientchallenge") {
        let Some(attempt) = state.attempt.as_ref() else {
            return pair_failure();
        };
        let Ok(encrypted) = hex::decode(challenge) else {
            return pair_failure();
        };
        let plain = crypto::decrypt_blocks(&attempt.aes_key, &encrypted).unwrap();
        if plain.len() < 16 {
            return pair_failure();
        }

        // hash(client challenge ‖ host cert signature ‖ host secret),
        // followed by the host's own challenge
        let response_hash = crypto::sha256_concat(&[
            &plain[..16],
            state.identity.cert_signature(),
            &attempt.server_secret,
        ]);
        let mut blob = response_hash.to_vec();
        blob.extend_from_slice(&attempt.server_challenge);
        let encrypted = crypto::encrypt_blocks(&attempt.aes_key, &blob).unwrap();

        return format!(
            "<root status_code=\"200\"><paired>1</paired><challengeresponse>{}</challengeresponse></root>",
            hex::encode(encrypted)
        );
    }

    if query_value(query, "serverchallengeresp").is_some() {
        let Some(attempt) = state.attempt.as_ref() else {
            return pair_failure();
        };

        let mut signature = state.identity.sign(&attempt.server_secret).unwrap();
        if state.tamper_secret_signature {
            signature[0] ^= 0xFF;
        }
        let mut secret = attempt.server_secret.to_vec();
        secret.extend_from_slice(&signature);

        return format!(
            "<root status_code=\"200\"><paired>1</paired><pairingsecret>{}</pairingsecret></root>",
            hex::encode(secret)
        );
    }

    if let Some(secret) = query_value(query, "clientpairingsecret") {
        let Some(attempt) = state.attempt.as_ref() else {
            return pair_failure();
        };
        let Ok(blob) = hex::decode(secret) else {
            return pair_failure();
        };
        if blob.len() <= 16 {
            return pair_failure();
        }
        let (client_secret, client_signature) = blob.split_at(16);

        let public_key = attempt.client_cert.public_key().unwrap();
        let valid =
            crypto::verify_signature(&public_key, client_secret, client_signature).unwrap();
        if !valid {
            return pair_failure();
        }

        state.paired = true;
        return "<root status_code=\"200\"><paired>1</paired></root>".to_string();
    }

    pair_failure()
}

async fn serve_rtsp(listener: TcpListener, state: Arc<Mutex<HostState>>) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let _ = handle_rtsp(stream, state).await;
        });
    }
}

async fn handle_rtsp(stream: TcpStream, state: Arc<Mutex<HostState>>) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();

    let mut cseq = String::new();
    let mut session = None;
    let mut content_length = 0usize;

    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if read == 0 || line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            match name.trim() {
                "CSeq" => cseq = value.trim().to_string(),
                "Session" => session = Some(value.trim().to_string()),
                "Content-Length" => content_length = value.trim().parse().unwrap_or(0),
                _ => {}
            }
        }
    }

    if content_length > 0 {
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
    }

    state
        .lock()
        .unwrap()
        .rtsp_log
        .push((method.clone(), session));

    let mut response = format!("RTSP/1.0 200 OK\r\nCSeq: {cseq}\r\n");
    let mut body = String::new();
    match method.as_str() {
        "OPTIONS" => {
            response.push_str("Public: OPTIONS, DESCRIBE, SETUP, ANNOUNCE, PLAY\r\n");
        }
        "DESCRIBE" => {
            body = "v=0\r\ns=GameStream Session\r\nsprop-parameter-sets=AAAAAU\r\n".to_string();
            response.push_str("Content-Type: application/sdp\r\n");
        }
        "SETUP" => {
            response.push_str(&format!("Session: {MOCK_SESSION_ID};timeout=90\r\n"));
        }
        _ => {}
    }
    if !body.is_empty() {
        response.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    response.push_str("\r\n");
    response.push_str(&body);

    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
