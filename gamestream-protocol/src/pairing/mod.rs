//! Host Pairing
//!
//! One-time mutual authentication between client and host, establishing
//! trust through a short PIN the user reads off one screen and types into
//! the other.
//!
//! ## Handshake
//!
//! 1. A random 16-byte salt and the PIN derive a shared AES-128 key
//! 2. `getservercert` carries the salt and client certificate; the host
//!    answers with its own certificate
//! 3. The client sends an encrypted random challenge
//! 4. The host answers with an encrypted blob: its expected response hash
//!    followed by its own challenge
//! 5. The client answers the host challenge with a hash bound to its
//!    certificate signature and a fresh secret
//! 6. The host reveals its secret, signed; the signature is verified
//!    against the host certificate — failure means a foreign host
//! 7. The host's step-4 hash is recomputed from the revealed secret; a
//!    mismatch means the PIN was wrong
//! 8. The client reveals its own signed secret
//! 9. A final `pairchallenge` over the mutually-authenticated channel
//!    confirms the pairing
//! 10. `unpair` is issued on every exit path to clear half-finished host
//!     state
//!
//! The host certificate is persisted only after steps 6 and 7 both pass,
//! so a failed or mistyped attempt never leaves a trusted certificate
//! behind. All internal errors collapse into the closed [`PairState`]
//! outcome; callers never see raw transport errors from inside an attempt.

pub mod crypto;

use crate::control::ControlClient;
use crate::identity::{ClientIdentity, IdentityStore, ServerCertificate};
use crate::{ClientError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for every pairing round after `getservercert`
///
/// `getservercert` itself is unbounded: the host blocks on the user
/// entering the PIN into its pairing dialog.
pub const PAIRING_ROUND_TIMEOUT: Duration = Duration::from_secs(5);

/// Terminal outcome of a pairing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairState {
    /// No pairing attempt has completed
    NotPaired,
    /// The handshake completed and the host certificate is trusted
    Paired,
    /// The protocol ran correctly but the PIN did not match
    WrongPin,
    /// Transport failure, protocol violation or signature mismatch
    Failed,
    /// A pairing attempt is already open, here or on the host
    AlreadyInProgress,
}

/// Orchestrates the pairing handshake over a [`ControlClient`]
pub struct PairingManager {
    control: Arc<ControlClient>,
    identity: Arc<ClientIdentity>,
    store: IdentityStore,
    in_progress: AtomicBool,
}

impl PairingManager {
    pub fn new(
        control: Arc<ControlClient>,
        identity: Arc<ClientIdentity>,
        store: IdentityStore,
    ) -> Self {
        Self {
            control,
            identity,
            store,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Run one pairing attempt with the given PIN
    ///
    /// Blocks the calling task for the full handshake; every outcome is
    /// terminal and the host's half-finished state is cleared on exit.
    pub async fn pair(&self, pin: &str) -> PairState {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            debug!("pairing attempt rejected, another is in flight");
            return PairState::AlreadyInProgress;
        }

        let outcome = match self.run_handshake(pin).await {
            Ok(state) => state,
            Err(ClientError::WrongPin) => {
                info!("pairing failed: wrong PIN");
                PairState::WrongPin
            }
            Err(e) => {
                warn!("pairing failed: {e}");
                PairState::Failed
            }
        };

        // Clear half-finished pairing state on the host regardless of outcome
        if let Err(e) = self.control.unpair().await {
            debug!("trailing unpair failed: {e}");
        }

        self.in_progress.store(false, Ordering::SeqCst);
        outcome
    }

    async fn run_handshake(&self, pin: &str) -> Result<PairState> {
        let salt: [u8; 16] = crypto::random_bytes()?;
        let aes_key = crypto::derive_pairing_key(&salt, pin);

        // Present the salt and our certificate; the host hands back its own.
        let resp = self
            .control
            .pair_command(
                &[
                    ("phrase", "getservercert".to_string()),
                    ("salt", hex::encode(salt)),
                    ("clientcert", hex::encode(self.identity.cert_pem())),
                ],
                None,
            )
            .await?;

        if resp.plain_cert.is_empty() {
            info!("host already has a pairing attempt open");
            return Ok(PairState::AlreadyInProgress);
        }

        let server_cert_pem = hex::decode(&resp.plain_cert)?;
        let server_cert = ServerCertificate::from_pem(&server_cert_pem)?;

        // Challenge the host under the PIN-derived key.
        let client_challenge: [u8; 16] = crypto::random_bytes()?;
        let encrypted_challenge = crypto::encrypt_blocks(&aes_key, &client_challenge)?;

        let resp = self
            .control
            .pair_command(
                &[("clientchallenge", hex::encode(&encrypted_challenge))],
                Some(PAIRING_ROUND_TIMEOUT),
            )
            .await?;

        if resp.challenge_response.is_empty() {
            return Err(ClientError::Protocol(
                "host challenge response is empty".to_string(),
            ));
        }

        let blob = crypto::decrypt_blocks(&aes_key, &hex::decode(&resp.challenge_response)?)?;
        if blob.len() < 48 {
            return Err(ClientError::Protocol(format!(
                "host challenge response too short: {} bytes",
                blob.len()
            )));
        }
        let server_response = &blob[..32];
        let server_challenge = &blob[32..48];

        // Answer with a hash bound to our certificate and a fresh secret.
        let client_secret: [u8; 16] = crypto::random_bytes()?;
        let challenge_hash = crypto::sha256_concat(&[
            server_challenge,
            self.identity.cert_signature(),
            &client_secret,
        ]);
        let encrypted_hash = crypto::encrypt_blocks(&aes_key, &challenge_hash)?;

        let resp = self
            .control
            .pair_command(
                &[("serverchallengeresp", hex::encode(&encrypted_hash))],
                Some(PAIRING_ROUND_TIMEOUT),
            )
            .await?;

        let secret_blob = hex::decode(&resp.pairing_secret)?;
        if secret_blob.len() <= 16 {
            return Err(ClientError::Protocol(format!(
                "host pairing secret too short: {} bytes",
                secret_blob.len()
            )));
        }
        let (server_secret, server_signature) = secret_blob.split_at(16);

        // A bad signature is a corrupt or foreign host, not a wrong PIN.
        let public_key = server_cert.public_key()?;
        if !crypto::verify_signature(&public_key, server_secret, server_signature)? {
            return Err(ClientError::Authentication(
                "host secret signature verification failed".to_string(),
            ));
        }

        // The revealed secret must reproduce the hash from step 4; this is
        // where a mistyped PIN surfaces.
        let expected = crypto::sha256_concat(&[
            &client_challenge,
            server_cert.signature(),
            server_secret,
        ]);
        if !crypto::secure_compare(&expected, server_response) {
            return Err(ClientError::WrongPin);
        }

        // Both checks passed: the host certificate is now trustworthy.
        self.store.save_server_certificate(&server_cert_pem)?;
        self.control.set_server_certificate(server_cert);

        // Reveal our signed secret so the host can run the same checks.
        let signature = self.identity.sign(&client_secret)?;
        let mut pairing_secret = client_secret.to_vec();
        pairing_secret.extend_from_slice(&signature);

        self.control
            .pair_command(
                &[("clientpairingsecret", hex::encode(&pairing_secret))],
                Some(PAIRING_ROUND_TIMEOUT),
            )
            .await?;

        self.control.pair_challenge(PAIRING_ROUND_TIMEOUT).await?;

        info!("pairing complete");
        Ok(PairState::Paired)
    }
}
