use serde::{Deserialize, Serialize};

/// Authentication descriptor on an [`AgentCard`].
///
/// Carries the method name and a key material *reference* (never the key
/// itself); the actual key lives in the keyring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAuth {
    /// Authentication method, e.g. `api_key` or `bearer_token`.
    pub method: String,
    /// Opaque reference to provisioned key material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ref: Option<String>,
}

impl Default for AgentAuth {
    fn default() -> Self {
        Self {
            method: "api_key".to_string(),
            key_ref: None,
        }
    }
}

/// Capability descriptor used for agent discovery and authentication.
///
/// Created at registration time, updated only by re-registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    /// Stable agent identifier.
    pub agent_id: String,
    /// Human-readable name.
    pub name: String,
    /// Capability tags this agent can execute, e.g. `image_analysis`.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Base URL where the agent accepts task execution calls.
    pub endpoint: String,
    /// How callers authenticate against this agent.
    #[serde(default)]
    pub authentication: AgentAuth,
    /// Interaction modes, e.g. `sync`, `stream`.
    #[serde(default)]
    pub supported_modes: Vec<String>,
    /// Medical specialization, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medical_specialization: Option<String>,
    /// Compliance certifications held by the agent operator.
    #[serde(default)]
    pub compliance_certifications: Vec<String>,
}

impl AgentCard {
    /// Creates a card with the given identity and endpoint.
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            endpoint: endpoint.into(),
            authentication: AgentAuth::default(),
            supported_modes: vec!["sync".to_string()],
            medical_specialization: None,
            compliance_certifications: Vec::new(),
        }
    }

    /// Adds capability tags.
    pub fn with_capabilities(mut self, caps: Vec<String>) -> Self {
        self.capabilities = caps;
        self
    }

    /// True when the agent advertises the given capability.
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}
