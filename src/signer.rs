//! Signer seam used by the `CNXN`/`AUTH` handshake (§4.1).
//!
//! Two backends are provided over the `rsa` crate, differing only in the
//! digest prehashed before the PKCS#1 v1.5 signature. Per §9, `RsaSha1Signer`
//! matches what real Android devices expect and is the one loaded by
//! [`RsaSha1Signer::load`]; `RsaSha256Signer` is kept only for parity with a
//! historical Python backend that (likely by mistake) hashed with SHA-256.

use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::hazmat::PrehashSigner;
use rsa::signature::SignatureEncoding;
use rsa::RsaPrivateKey;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use std::path::Path;

/// Signs an AUTH token and exports a public key, as required by the `AUTH`
/// handshake. Implementations must not mangle the token before signing —
/// the ADB layer hands over the raw 20 (or 32) challenge bytes.
pub trait AuthSigner {
    fn sign(&self, token: &[u8]) -> Result<Vec<u8>, SignerError>;
    /// Public key in the textual format ADB expects on the wire, without a
    /// trailing NUL (the caller appends one).
    fn public_key(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signing failed: {0}")]
    Sign(String),
    #[error("loading key failed: {0}")]
    Load(String),
}

/// The default, device-accepted signer: PKCS#1 v1.5 over a raw SHA-1 digest.
pub struct RsaSha1Signer {
    key: SigningKey<Sha1>,
    public_key: String,
}

impl RsaSha1Signer {
    pub fn new(private_key: RsaPrivateKey, public_key: String) -> Self {
        Self {
            key: SigningKey::<Sha1>::new(private_key),
            public_key,
        }
    }

    /// Loads `<path>` as a PKCS#8 PEM private key and `<path>.pub` as the
    /// matching textual public key, mirroring the teacher prototype and the
    /// original `CryptographySigner`. Key *generation* is out of scope
    /// (Non-goals); this only loads an already-enrolled key pair.
    pub fn load(path: &Path) -> Result<Self, SignerError> {
        let private_pem = std::fs::read_to_string(path)
            .map_err(|e| SignerError::Load(format!("reading {}: {e}", path.display())))?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&private_pem)
            .map_err(|e| SignerError::Load(format!("parsing private key: {e}")))?;
        let pub_path = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.pub", ext.to_string_lossy()),
            None => "pub".to_string(),
        });
        let public_key = std::fs::read_to_string(&pub_path)
            .map_err(|e| SignerError::Load(format!("reading {}: {e}", pub_path.display())))?
            .trim()
            .to_string();
        Ok(Self::new(private_key, public_key))
    }
}

impl AuthSigner for RsaSha1Signer {
    /// Signs the 20-byte token exactly as received (§4.1): real Android
    /// devices generate the token as a random nonce, not a hash, but expect
    /// it signed as if it already were a SHA-1 digest — PKCS#1 v1.5 with the
    /// SHA-1 `DigestInfo` prefix, no further hashing of the token itself.
    /// Hashing it again here (as a naive port would) produces a signature no
    /// device accepts.
    fn sign(&self, token: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.key
            .sign_prehash(token)
            .map(|sig| sig.to_bytes().to_vec())
            .map_err(|e| SignerError::Sign(e.to_string()))
    }

    fn public_key(&self) -> &str {
        &self.public_key
    }
}

/// Not what real devices expect (see §9); kept only to document the
/// historical `PycryptodomeAuthSigner` discrepancy.
pub struct RsaSha256Signer {
    key: SigningKey<Sha256>,
    public_key: String,
}

impl RsaSha256Signer {
    pub fn new(private_key: RsaPrivateKey, public_key: String) -> Self {
        Self {
            key: SigningKey::<Sha256>::new(private_key),
            public_key,
        }
    }
}

impl AuthSigner for RsaSha256Signer {
    /// Reproduces the historical `PycryptodomeAuthSigner` bug verbatim: it
    /// hashes the token with SHA-256 before signing, instead of treating the
    /// token as an already-computed digest the way real devices expect. Kept
    /// for parity testing against that backend, not wired up by default.
    fn sign(&self, token: &[u8]) -> Result<Vec<u8>, SignerError> {
        let digest = Sha256::digest(token);
        self.key
            .sign_prehash(&digest)
            .map(|sig| sig.to_bytes().to_vec())
            .map_err(|e| SignerError::Sign(e.to_string()))
    }

    fn public_key(&self) -> &str {
        &self.public_key
    }
}

impl fmt::Debug for RsaSha1Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSha1Signer").finish_non_exhaustive()
    }
}

impl fmt::Debug for RsaSha256Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaSha256Signer").finish_non_exhaustive()
    }
}
