//! Envelope encryption for secrets at rest.
//!
//! Each organization owns a random 32-byte data key, stored wrapped by the
//! master key. Per-user secrets (MFA seeds) and per-org secrets (session
//! signing keys) are sealed under the unwrapped org key with an AAD that
//! binds the ciphertext to its tenant and purpose. Ciphertext layout is
//! `nonce (12 bytes) || ciphertext`.
//!
//! Non-production environments may run the same call contract in
//! `Passthrough` mode, where sealing is the identity function and no
//! key-management infrastructure is needed.

use anyhow::Result;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::{rngs::OsRng, RngCore};
use uuid::Uuid;

use crate::config::CryptoConfig;

const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;

#[derive(Clone)]
enum Mode {
    Sealed { master_key: [u8; KEY_LEN] },
    Passthrough,
}

/// Entry point to the envelope scheme. Cheap to clone.
#[derive(Clone)]
pub struct EnvelopeCrypto {
    mode: Mode,
}

impl EnvelopeCrypto {
    pub fn new(config: &CryptoConfig) -> Self {
        let mode = match config {
            CryptoConfig::Sealed { master_key } => Mode::Sealed {
                master_key: *master_key,
            },
            CryptoConfig::Passthrough => Mode::Passthrough,
        };
        Self { mode }
    }

    /// Generate a fresh org data key and return it wrapped for storage.
    pub fn generate_org_key(&self, org_id: Uuid) -> Result<Vec<u8>> {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);

        match &self.mode {
            Mode::Sealed { master_key } => seal(master_key, &key, &org_key_aad(org_id)),
            Mode::Passthrough => Ok(key.to_vec()),
        }
    }

    /// Unwrap an organization's stored data key.
    ///
    /// Failure here means the key material cannot be trusted; callers on the
    /// authorization path must treat it as an authorization failure.
    pub fn open_org_key(&self, key_ciphertext: &[u8], org_id: Uuid) -> Result<OrgKey> {
        match &self.mode {
            Mode::Sealed { master_key } => {
                let plaintext = open(master_key, key_ciphertext, &org_key_aad(org_id))?;
                let key: [u8; KEY_LEN] = plaintext
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("Org key has invalid length"))?;
                Ok(OrgKey {
                    mode: OrgKeyMode::Sealed { key },
                })
            }
            Mode::Passthrough => Ok(OrgKey {
                mode: OrgKeyMode::Passthrough,
            }),
        }
    }
}

#[derive(Clone)]
enum OrgKeyMode {
    Sealed { key: [u8; KEY_LEN] },
    Passthrough,
}

/// An unwrapped org data key, usable to seal and open per-tenant secrets.
#[derive(Clone)]
pub struct OrgKey {
    mode: OrgKeyMode,
}

impl OrgKey {
    pub fn seal(&self, plaintext: &[u8], aad: &str) -> Result<Vec<u8>> {
        match &self.mode {
            OrgKeyMode::Sealed { key } => seal(key, plaintext, aad),
            OrgKeyMode::Passthrough => Ok(plaintext.to_vec()),
        }
    }

    pub fn open(&self, ciphertext: &[u8], aad: &str) -> Result<Vec<u8>> {
        match &self.mode {
            OrgKeyMode::Sealed { key } => open(key, ciphertext, aad),
            OrgKeyMode::Passthrough => Ok(ciphertext.to_vec()),
        }
    }
}

fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &str) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let payload = Payload {
        msg: plaintext,
        aad: aad.as_bytes(),
    };

    let ciphertext = cipher
        .encrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Encryption failure: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

fn open(key: &[u8; KEY_LEN], data: &[u8], aad: &str) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(anyhow::anyhow!("Invalid ciphertext length"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let payload = Payload {
        msg: ciphertext,
        aad: aad.as_bytes(),
    };

    cipher
        .decrypt(nonce, payload)
        .map_err(|e| anyhow::anyhow!("Decryption failure: {e}"))
}

fn org_key_aad(org_id: Uuid) -> String {
    format!("org-key:v1|{org_id}")
}

/// AAD for a user's MFA seed.
pub fn mfa_seed_aad(org_id: Uuid, user_id: Uuid) -> String {
    format!("mfa-seed:v1|{org_id}|{user_id}")
}

/// AAD for an organization's session-signing key.
pub fn signing_key_aad(org_id: Uuid) -> String {
    format!("signing-key:v1|{org_id}")
}
