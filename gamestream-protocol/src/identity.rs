//! Client Identity and Certificate Storage
//!
//! Every client owns a long-lived RSA key pair and a self-signed X.509
//! certificate. The pair is generated once, persisted under a per-user
//! directory and reused for every subsequent pairing and control exchange;
//! the host's certificate is stored alongside it after a successful
//! pairing.
//!
//! ## Storage Layout
//!
//! - `client.crt` — client certificate, PEM, mode 0600
//! - `client.key` — client private key, PKCS#8 PEM, mode 0600
//! - `server.crt` — paired host certificate, PEM, mode 0600
//!
//! A corrupted identity is a hard error, never silently regenerated:
//! regenerating would invalidate every pairing the user already completed.

use crate::{ClientError, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::Rsa;
use openssl::sign::Signer;
use openssl::x509::{X509, X509Name};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default certificate validity (20 years, in days)
pub const CERT_VALIDITY_DAYS: u32 = 20 * 365;

/// Default RSA key size
pub const CERT_KEY_BITS: u32 = 2048;

/// Common name on generated client certificates
const CERT_COMMON_NAME: &str = "GameStream Client";

const CLIENT_CERT_FILE: &str = "client.crt";
const CLIENT_KEY_FILE: &str = "client.key";
const SERVER_CERT_FILE: &str = "server.crt";

/// The client's long-lived key pair and self-signed certificate
///
/// Immutable once created; shared read-only between the pairing manager
/// and control client.
#[derive(Clone)]
pub struct ClientIdentity {
    unique_id: String,
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
    certificate: X509,
    private_key: PKey<Private>,
}

impl ClientIdentity {
    /// Generate a fresh self-signed RSA identity
    ///
    /// # Arguments
    ///
    /// * `validity_days` - certificate lifetime; 0 selects the 20-year default
    /// * `key_bits` - RSA modulus size; 0 selects 2048
    pub fn generate(validity_days: u32, key_bits: u32) -> Result<Self> {
        let validity_days = if validity_days == 0 {
            CERT_VALIDITY_DAYS
        } else {
            validity_days
        };
        let key_bits = if key_bits == 0 { CERT_KEY_BITS } else { key_bits };

        let rsa = Rsa::generate(key_bits)?;
        let pkey = PKey::from_rsa(rsa)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;

        let mut serial = BigNum::new()?;
        serial.rand(159, MsbOption::MAYBE_ZERO, false)?;
        let serial_int = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial_int)?;

        let mut name = X509Name::builder()?;
        name.append_entry_by_text("CN", CERT_COMMON_NAME)?;
        let name = name.build();
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;

        let not_before = Asn1Time::days_from_now(0)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::days_from_now(validity_days)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(&pkey)?;
        builder.sign(&pkey, MessageDigest::sha256())?;

        let certificate = builder.build();
        let cert_pem = certificate.to_pem()?;
        let key_pem = pkey.private_key_to_pem_pkcs8()?;
        let unique_id = derive_unique_id(&cert_pem);

        info!("generated client identity {}", unique_id);

        Ok(Self {
            unique_id,
            cert_pem,
            key_pem,
            certificate,
            private_key: pkey,
        })
    }

    /// Reconstruct an identity from PEM-encoded certificate and key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certificate = X509::from_pem(cert_pem)?;
        let private_key = PKey::private_key_from_pem(key_pem)?;
        let unique_id = derive_unique_id(cert_pem);

        Ok(Self {
            unique_id,
            cert_pem: cert_pem.to_vec(),
            key_pem: key_pem.to_vec(),
            certificate,
            private_key,
        })
    }

    /// Stable client identifier sent as `uniqueid` on every request
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// PEM-encoded certificate as sent during pairing
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// PEM-encoded private key
    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }

    /// Parsed certificate
    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// Raw signature bytes of the client certificate
    ///
    /// Mixed into the pairing challenge hashes on the client side.
    pub fn cert_signature(&self) -> &[u8] {
        self.certificate.signature().as_slice()
    }

    /// Key followed by certificate, the layout `reqwest::Identity` expects
    pub fn identity_pem(&self) -> Vec<u8> {
        let mut pem = self.key_pem.clone();
        pem.extend_from_slice(&self.cert_pem);
        pem
    }

    /// Sign `data` with RSA PKCS#1 v1.5 over SHA-256
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.private_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// A paired host's certificate
///
/// Only trustworthy once the pairing signature verification has succeeded;
/// the store persists it at exactly that point and never earlier.
#[derive(Clone)]
pub struct ServerCertificate {
    pem: Vec<u8>,
    certificate: X509,
}

impl ServerCertificate {
    /// Parse a host certificate from PEM bytes
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certificate = X509::from_pem(pem)?;
        Ok(Self {
            pem: pem.to_vec(),
            certificate,
        })
    }

    pub fn pem(&self) -> &[u8] {
        &self.pem
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    /// Raw signature bytes, mixed into the host-side challenge hash
    pub fn signature(&self) -> &[u8] {
        self.certificate.signature().as_slice()
    }

    /// The host's public key, used to verify its pairing secret signature
    pub fn public_key(&self) -> Result<PKey<Public>> {
        Ok(self.certificate.public_key()?)
    }
}

/// On-disk store for the client identity and the paired host certificate
#[derive(Debug, Clone)]
pub struct IdentityStore {
    dir: PathBuf,
}

impl IdentityStore {
    /// Store rooted at an explicit directory (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at the per-user default location
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            ClientError::State("no home directory for identity storage".to_string())
        })?;
        Ok(Self::new(home.join(".gamestream").join("certs")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load an existing identity
    ///
    /// Fails with [`ClientError::IdentityNotFound`] when either file is
    /// missing; any other filesystem or parse error is fatal to the caller.
    pub fn load(&self) -> Result<ClientIdentity> {
        let cert_path = self.dir.join(CLIENT_CERT_FILE);
        let key_path = self.dir.join(CLIENT_KEY_FILE);

        if !cert_path.exists() || !key_path.exists() {
            return Err(ClientError::IdentityNotFound(
                self.dir.display().to_string(),
            ));
        }

        debug!("loading client identity from {:?}", self.dir);
        let cert_pem = fs::read(&cert_path)?;
        let key_pem = fs::read(&key_path)?;
        ClientIdentity::from_pem(&cert_pem, &key_pem)
    }

    /// Generate a fresh identity and persist it
    pub fn generate(&self, validity_days: u32, key_bits: u32) -> Result<ClientIdentity> {
        let identity = ClientIdentity::generate(validity_days, key_bits)?;
        self.ensure_dir()?;
        write_restricted(&self.dir.join(CLIENT_CERT_FILE), identity.cert_pem())?;
        write_restricted(&self.dir.join(CLIENT_KEY_FILE), identity.key_pem())?;
        info!("persisted client identity to {:?}", self.dir);
        Ok(identity)
    }

    /// Load the identity, generating and persisting one on first run
    pub fn load_or_generate(&self) -> Result<ClientIdentity> {
        match self.load() {
            Ok(identity) => Ok(identity),
            Err(ClientError::IdentityNotFound(_)) => self.generate(0, 0),
            Err(e) => Err(e),
        }
    }

    /// Persist the pairing-verified host certificate
    pub fn save_server_certificate(&self, pem: &[u8]) -> Result<()> {
        self.ensure_dir()?;
        write_restricted(&self.dir.join(SERVER_CERT_FILE), pem)?;
        debug!("persisted host certificate to {:?}", self.dir);
        Ok(())
    }

    /// Load the paired host certificate, if one exists
    ///
    /// `None` means the host is not paired; callers must re-pair rather
    /// than fall back to an untrusted exchange.
    pub fn load_server_certificate(&self) -> Result<Option<ServerCertificate>> {
        let path = self.dir.join(SERVER_CERT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let pem = fs::read(&path)?;
        Ok(Some(ServerCertificate::from_pem(&pem)?))
    }

    /// Remove the stored host certificate (local unpair)
    pub fn remove_server_certificate(&self) -> Result<()> {
        let path = self.dir.join(SERVER_CERT_FILE);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)?;
            restrict_dir(&self.dir)?;
        }
        Ok(())
    }
}

/// Derive the client identifier from the certificate PEM
///
/// Uppercase hex of the first 16 bytes of SHA-256 over the PEM bytes.
fn derive_unique_id(cert_pem: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cert_pem);
    let hash = hasher.finalize();
    hex::encode_upper(&hash[..16])
}

fn write_restricted(path: &Path, data: &[u8]) -> Result<()> {
    fs::write(path, data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn restrict_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_identity_generation() {
        let identity = ClientIdentity::generate(0, 0).unwrap();

        assert!(!identity.cert_pem().is_empty());
        assert!(!identity.key_pem().is_empty());
        assert!(!identity.cert_signature().is_empty());

        // Unique ID is 16 bytes of hash, upper hex
        assert_eq!(identity.unique_id().len(), 32);
        assert!(identity
            .unique_id()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_identity_round_trip() {
        let original = ClientIdentity::generate(0, 0).unwrap();
        let loaded = ClientIdentity::from_pem(original.cert_pem(), original.key_pem()).unwrap();

        assert_eq!(original.unique_id(), loaded.unique_id());
        assert_eq!(original.cert_signature(), loaded.cert_signature());
    }

    #[test]
    fn test_store_generate_then_load() {
        let temp = TempDir::new().unwrap();
        let store = IdentityStore::new(temp.path().join("certs"));

        let generated = store.generate(0, 0).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(generated.unique_id(), loaded.unique_id());
        assert!(temp.path().join("certs").join("client.crt").exists());
        assert!(temp.path().join("certs").join("client.key").exists());
    }

    #[test]
    fn test_load_missing_identity() {
        let temp = TempDir::new().unwrap();
        let store = IdentityStore::new(temp.path());

        let result = store.load();
        assert!(matches!(result, Err(ClientError::IdentityNotFound(_))));
    }

    #[test]
    fn test_load_or_generate_is_stable() {
        let temp = TempDir::new().unwrap();
        let store = IdentityStore::new(temp.path().join("certs"));

        let first = store.load_or_generate().unwrap();
        let second = store.load_or_generate().unwrap();
        assert_eq!(first.unique_id(), second.unique_id());
    }

    #[test]
    fn test_server_certificate_persistence() {
        let temp = TempDir::new().unwrap();
        let store = IdentityStore::new(temp.path().join("certs"));

        assert!(store.load_server_certificate().unwrap().is_none());

        // Any self-signed certificate will do as the host's
        let host = ClientIdentity::generate(0, 0).unwrap();
        store.save_server_certificate(host.cert_pem()).unwrap();

        let loaded = store.load_server_certificate().unwrap().unwrap();
        assert_eq!(loaded.pem(), host.cert_pem());
        assert_eq!(loaded.signature(), host.cert_signature());

        store.remove_server_certificate().unwrap();
        assert!(store.load_server_certificate().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_material_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let store = IdentityStore::new(temp.path().join("certs"));
        store.generate(0, 0).unwrap();

        let mode = fs::metadata(temp.path().join("certs").join("client.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
