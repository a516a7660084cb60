//! Site environment variables: at-rest encryption and dotenv-style parsing

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::errors::EngineError;

/// Prefix of every encrypted blob
pub const ENCRYPTED_PREFIX: &str = "enc:v1:";

const KDF_ROUNDS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// AES-256-GCM over env blobs; without a key both directions pass through
#[derive(Clone)]
pub struct EnvCipher {
    key: Option<[u8; 32]>,
}

impl std::fmt::Debug for EnvCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvCipher")
            .field("enabled", &self.key.is_some())
            .finish()
    }
}

impl EnvCipher {
    /// Derive the key from a secret; a blank secret disables encryption
    pub fn new(secret: Option<&str>) -> Self {
        let key = secret.filter(|s| !s.is_empty()).map(derive_key);
        Self { key }
    }

    pub fn disabled() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Encrypt into `enc:v1:<iv>:<tag>:<ciphertext>`
    pub fn encrypt(&self, plaintext: &str) -> Result<String, EngineError> {
        let Some(key) = &self.key else {
            return Ok(plaintext.to_string());
        };
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| EngineError::Crypto(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| EngineError::Crypto(e.to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}{}:{}:{}",
            ENCRYPTED_PREFIX,
            STANDARD.encode(nonce),
            STANDARD.encode(tag),
            STANDARD.encode(ciphertext)
        ))
    }

    /// Decrypt a blob; text without the prefix is returned unchanged
    pub fn decrypt(&self, blob: &str) -> Result<String, EngineError> {
        let Some(body) = blob.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(blob.to_string());
        };
        let Some(key) = &self.key else {
            return Ok(blob.to_string());
        };

        let parts: Vec<&str> = body.split(':').collect();
        let [iv, tag, ciphertext] = parts.as_slice() else {
            return Err(EngineError::Crypto("malformed encrypted value".to_string()));
        };
        let decode = |part: &str| {
            STANDARD
                .decode(part)
                .map_err(|e| EngineError::Crypto(format!("bad encoding: {}", e)))
        };
        let iv = decode(*iv)?;
        let tag = decode(*tag)?;
        let mut sealed = decode(*ciphertext)?;
        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(EngineError::Crypto("malformed encrypted value".to_string()));
        }
        sealed.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| EngineError::Crypto(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
            .map_err(|_| EngineError::Crypto("decryption failed".to_string()))?;
        String::from_utf8(plaintext).map_err(|e| EngineError::Crypto(e.to_string()))
    }
}

fn derive_key(secret: &str) -> [u8; 32] {
    let salt_hash = Sha256::digest(format!("{}:salt", secret).as_bytes());
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salt_hash[..16], KDF_ROUNDS, &mut key);
    key
}

/// Parse `KEY=value` lines, skipping blanks and `#` comments and stripping matching quotes
pub fn parse_env_text(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let idx = line.find('=').filter(|&i| i > 0)?;
            let key = line[..idx].trim();
            let value = unquote(line[idx + 1..].trim());
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
