use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use regex::Regex;
use triagent_core::{Payload, TriagentError, TriagentResult};

/// Prefix tagging an encrypted field value.
pub const CIPHERTEXT_TAG: &str = "enc:v1:";

/// Marker substituted for a field whose ciphertext could not be decrypted.
pub const DECRYPT_FAILED_MARKER: &str = "[decryption failed]";

/// Default pattern matching payload keys that may carry PHI.
pub const DEFAULT_SENSITIVE_PATTERN: &str =
    r"(?i)(patient|name|dob|birth|ssn|mrn|address|phone|email)";

const NONCE_LEN: usize = 12;

/// Field-level ChaCha20-Poly1305 encryption of sensitive payload keys.
///
/// Before transmission, any string field whose key matches the sensitive
/// pattern is replaced with `enc:v1:<base64(nonce || ciphertext)>`. On
/// receipt, tagged fields are decrypted transparently; a single field's
/// decrypt failure is reported but never aborts the task.
pub struct FieldCipher {
    cipher: ChaCha20Poly1305,
    pattern: Regex,
}

impl FieldCipher {
    /// Creates a cipher over a 32-byte key and a sensitive-key regex.
    pub fn new(key: &[u8], pattern: Option<&str>) -> TriagentResult<Self> {
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| TriagentError::Encryption("key must be 32 bytes".into()))?;
        let pattern = Regex::new(pattern.unwrap_or(DEFAULT_SENSITIVE_PATTERN))
            .map_err(|e| TriagentError::Config(format!("invalid sensitive pattern: {e}")))?;
        Ok(Self { cipher, pattern })
    }

    /// Generates a fresh 32-byte key.
    ///
    /// A process that only ever uses a fresh key cannot decrypt fields after
    /// a restart; deployments should persist the key and pass it to
    /// [`FieldCipher::new`].
    pub fn generate_key() -> [u8; 32] {
        ChaCha20Poly1305::generate_key(&mut OsRng).into()
    }

    /// True when the payload key matches the sensitive pattern.
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    /// True when the value carries the ciphertext tag.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(CIPHERTEXT_TAG)
    }

    /// Encrypts a single value into a tagged ciphertext string.
    pub fn encrypt_value(&self, plaintext: &str) -> TriagentResult<String> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| TriagentError::Encryption("encryption failed".into()))?;
        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{CIPHERTEXT_TAG}{}", B64.encode(blob)))
    }

    /// Decrypts a tagged ciphertext string back to the original value.
    pub fn decrypt_value(&self, tagged: &str) -> TriagentResult<String> {
        let encoded = tagged
            .strip_prefix(CIPHERTEXT_TAG)
            .ok_or_else(|| TriagentError::Encryption("value is not tagged ciphertext".into()))?;
        let blob = B64
            .decode(encoded)
            .map_err(|_| TriagentError::Encryption("ciphertext is not valid base64".into()))?;
        if blob.len() <= NONCE_LEN {
            return Err(TriagentError::Encryption("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| TriagentError::Encryption("decryption failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| TriagentError::Encryption("decrypted value is not utf-8".into()))
    }

    /// Encrypts every sensitive string field in place.
    ///
    /// Returns the keys that were sealed.
    pub fn seal_payload(&self, payload: &mut Payload) -> TriagentResult<Vec<String>> {
        let mut sealed = Vec::new();
        for (key, value) in payload.iter_mut() {
            if let serde_json::Value::String(s) = value {
                if self.is_sensitive(key) && !Self::is_encrypted(s) {
                    *s = self.encrypt_value(s)?;
                    sealed.push(key.clone());
                }
            }
        }
        Ok(sealed)
    }

    /// Decrypts every tagged field in place.
    ///
    /// Fields that fail to decrypt are replaced with
    /// [`DECRYPT_FAILED_MARKER`]; their keys are returned so the caller can
    /// audit the failure. The payload is always usable afterwards.
    pub fn open_payload(&self, payload: &mut Payload) -> Vec<String> {
        let mut failed = Vec::new();
        for (key, value) in payload.iter_mut() {
            if let serde_json::Value::String(s) = value {
                if Self::is_encrypted(s) {
                    match self.decrypt_value(s) {
                        Ok(plain) => *s = plain,
                        Err(_) => {
                            *s = DECRYPT_FAILED_MARKER.to_string();
                            failed.push(key.clone());
                        }
                    }
                }
            }
        }
        failed
    }
}
