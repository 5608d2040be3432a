use dashmap::DashMap;
use triagent_core::AgentCard;

/// Registry of known agent cards, keyed by agent id.
///
/// Cards are created at registration time and replaced wholesale on
/// re-registration.
#[derive(Default)]
pub struct AgentRegistry {
    cards: DashMap<String, AgentCard>,
}

impl AgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or re-registers an agent card.
    pub fn register(&self, card: AgentCard) {
        self.cards.insert(card.agent_id.clone(), card);
    }

    /// Looks up a card by agent id.
    pub fn get(&self, agent_id: &str) -> Option<AgentCard> {
        self.cards.get(agent_id).map(|c| c.clone())
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True when no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}
