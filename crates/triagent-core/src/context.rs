use crate::task::TaskPriority;
use serde::{Deserialize, Serialize};

/// Clinical urgency of a case, independent of queue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedicalUrgency {
    /// Scheduled, non-urgent work.
    Routine,
    /// Needs attention within hours.
    Urgent,
    /// Needs attention now.
    Critical,
    /// Life-threatening.
    Emergency,
}

/// Pseudonymized medical metadata shared by all tasks of one case.
///
/// Created once per case and read-only afterwards. Carries a token id in
/// place of any patient-identifying data; raw PHI never appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalContext {
    /// Pseudonymous patient reference, never raw PHI.
    pub token_id: String,
    /// Priority tier applied to the case as a whole.
    pub case_priority: TaskPriority,
    /// Clinical urgency classification.
    pub medical_urgency: MedicalUrgency,
    /// Anatomical location under analysis, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anatomical_location: Option<String>,
    /// Known risk factors.
    #[serde(default)]
    pub risk_factors: Vec<String>,
    /// Known contraindications.
    #[serde(default)]
    pub contraindications: Vec<String>,
    /// Whether a specialist must review the case outcome.
    #[serde(default)]
    pub requires_specialist: bool,
    /// Contacts to notify on escalation.
    #[serde(default)]
    pub escalation_contacts: Vec<String>,
}

impl MedicalContext {
    /// Creates a minimal context for the given token and priority.
    pub fn new(token_id: impl Into<String>, case_priority: TaskPriority) -> Self {
        let medical_urgency = match case_priority {
            TaskPriority::Critical => MedicalUrgency::Critical,
            TaskPriority::High => MedicalUrgency::Urgent,
            TaskPriority::Normal | TaskPriority::Low => MedicalUrgency::Routine,
        };
        Self {
            token_id: token_id.into(),
            case_priority,
            medical_urgency,
            anatomical_location: None,
            risk_factors: Vec::new(),
            contraindications: Vec::new(),
            requires_specialist: false,
            escalation_contacts: Vec::new(),
        }
    }
}
