use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use triagent_core::{TriagentError, TriagentResult};

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 86_400;

/// Per-agent API key provisioning and verification.
///
/// Keys are generated at registration and handed back exactly once; callers
/// present them on `POST /auth/token` to obtain a scoped token.
#[derive(Default)]
pub struct AgentKeyring {
    keys: RwLock<HashMap<String, String>>,
}

impl AgentKeyring {
    /// Creates an empty keyring.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisions a fresh API key for the agent, replacing any previous key.
    pub fn register(&self, agent_id: &str) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let key = hex::encode(bytes);
        self.keys.write().insert(agent_id.to_string(), key.clone());
        key
    }

    /// Verifies an agent/key pair.
    pub fn verify(&self, agent_id: &str, api_key: &str) -> bool {
        self.keys
            .read()
            .get(agent_id)
            .is_some_and(|k| constant_time_eq(k.as_bytes(), api_key.as_bytes()))
    }

    /// Number of provisioned agents.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// True when no agent has been provisioned.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Claims carried inside a signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Agent the token was issued to.
    pub agent_id: String,
    /// Capabilities the token is scoped to.
    pub capabilities: Vec<String>,
    /// Issue time, unix seconds.
    pub issued_at: i64,
    /// Expiry time, unix seconds.
    pub expires_at: i64,
}

/// A signed token plus its remaining lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct SignedToken {
    /// Opaque token string: `base64(claims).base64(hmac)`.
    pub token: String,
    /// Seconds until expiry.
    pub expires_in: u64,
}

/// Issues and validates HMAC-SHA256 signed capability tokens.
pub struct TokenIssuer {
    secret: Vec<u8>,
    default_ttl_secs: u64,
}

impl TokenIssuer {
    /// Creates an issuer over the given signing secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            default_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }

    /// Overrides the default token lifetime.
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.default_ttl_secs = ttl_secs;
        self
    }

    /// Issues a token scoped to the given capabilities.
    pub fn issue(
        &self,
        agent_id: &str,
        capabilities: Vec<String>,
        ttl_secs: Option<u64>,
    ) -> TriagentResult<SignedToken> {
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            agent_id: agent_id.to_string(),
            capabilities,
            issued_at: now,
            expires_at: now + ttl as i64,
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let sig = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes())?);
        Ok(SignedToken {
            token: format!("{payload}.{sig}"),
            expires_in: ttl,
        })
    }

    /// Validates signature and expiry, returning the claims.
    pub fn validate(&self, token: &str) -> TriagentResult<TokenClaims> {
        let (payload, sig) = token
            .split_once('.')
            .ok_or_else(|| TriagentError::Authentication("malformed token".into()))?;
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|_| TriagentError::Authentication("malformed token signature".into()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TriagentError::Authentication(e.to_string()))?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig_bytes)
            .map_err(|_| TriagentError::Authentication("invalid token signature".into()))?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TriagentError::Authentication("malformed token payload".into()))?;
        let claims: TokenClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|_| TriagentError::Authentication("malformed token claims".into()))?;

        if claims.expires_at <= Utc::now().timestamp() {
            return Err(TriagentError::Authentication("token expired".into()));
        }
        Ok(claims)
    }

    /// Enforces capability scoping on validated claims.
    pub fn require_capability(claims: &TokenClaims, capability: &str) -> TriagentResult<()> {
        if claims.capabilities.iter().any(|c| c == capability) {
            Ok(())
        } else {
            Err(TriagentError::Authentication(format!(
                "token not scoped for capability '{capability}'"
            )))
        }
    }

    fn sign(&self, payload: &[u8]) -> TriagentResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TriagentError::Authentication(e.to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
