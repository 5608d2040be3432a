use crate::dispatch::{AgentDispatcher, DispatchOptions};
use crate::escalation::{
    EscalationEngine, EscalationEvent, EscalationTrigger, Notifier, ReviewQueue, TracingNotifier,
};
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::registry::AgentRegistry;
use crate::scheduler::PriorityScheduler;
use crate::store::TaskStore;
use crate::timeout::TimeoutMonitor;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use triagent_core::{
    AgentCard, DispatchPath, EventType, MedicalContext, Payload, Task, TaskOutcome, TaskPriority,
    TaskStatus, TriagentError, TriagentResult,
};
use triagent_security::{AgentKeyring, AuditLog, FieldCipher, SignedToken, TokenClaims, TokenIssuer};
use uuid::Uuid;

/// Specification of one task within a case submission.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Handler selection tag.
    pub task_type: String,
    /// Agent expected to execute the task.
    pub target_agent_id: String,
    /// Initial payload; sensitive fields are sealed at creation.
    pub payload: Payload,
    /// Priority tier; defaults to the case priority.
    pub priority: Option<TaskPriority>,
    /// Prerequisite task ids.
    pub depends_on: Vec<Uuid>,
    /// Prerequisites by index into the same case submission.
    pub depends_on_specs: Vec<usize>,
    /// Operational override of the priority-derived deadline.
    pub timeout_override: Option<u64>,
}

impl TaskSpec {
    /// Creates a spec for the given task type and target agent.
    pub fn new(task_type: impl Into<String>, target_agent_id: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            target_agent_id: target_agent_id.into(),
            payload: Payload::new(),
            priority: None,
            depends_on: Vec::new(),
            depends_on_specs: Vec::new(),
            timeout_override: None,
        }
    }

    /// Sets the payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Overrides the priority tier.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Depends on an earlier spec in the same submission.
    pub fn after_spec(mut self, index: usize) -> Self {
        self.depends_on_specs.push(index);
        self
    }

    /// Overrides the deadline in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_override = Some(secs);
        self
    }
}

/// Per-task entry of a [`ConsolidatedResult`].
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    /// Task id.
    pub task_id: Uuid,
    /// Handler selection tag.
    pub task_type: String,
    /// Executing agent.
    pub target_agent_id: String,
    /// Terminal (or still pending) status.
    pub status: TaskStatus,
    /// Remote vs. local fallback, when dispatched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispatch_path: Option<DispatchPath>,
    /// Whether any escalation trigger fired.
    pub escalated: bool,
    /// Reason for the most recent escalation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
    /// Result map for completed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    /// Error string for failed tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Task> for CaseReport {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.task_id,
            task_type: task.task_type.clone(),
            target_agent_id: task.target_agent_id.clone(),
            status: task.status,
            dispatch_path: task.dispatch_path,
            escalated: task.escalated,
            escalation_reason: task.escalation_reason.clone(),
            result: task.outcome.as_ref().and_then(|o| o.result().cloned()),
            error: task
                .outcome
                .as_ref()
                .and_then(|o| o.error().map(String::from)),
        }
    }
}

/// Merged outcome of all tasks belonging to one case.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedResult {
    /// Case id.
    pub case_id: Uuid,
    /// Total tasks in the case.
    pub total_tasks: usize,
    /// Tasks that completed.
    pub completed: usize,
    /// Tasks that failed.
    pub failed: usize,
    /// Tasks cancelled before completion.
    pub cancelled: usize,
    /// Tasks still non-terminal at the deadline.
    pub pending: usize,
    /// Tasks with at least one escalation.
    pub escalated: usize,
    /// True when the case-level deadline elapsed first.
    pub deadline_exceeded: bool,
    /// Per-task reports.
    pub reports: Vec<CaseReport>,
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Agents in the registry.
    pub registered_agents: usize,
    /// Pending tasks across all agents.
    pub pending_tasks: usize,
    /// Total tasks in the store.
    pub total_tasks: usize,
    /// Handler failures per task type.
    pub failure_counts: HashMap<String, u64>,
}

/// Construction parameters for [`Orchestrator::start`].
pub struct OrchestratorConfig {
    /// Card of the hosting agent.
    pub card: AgentCard,
    /// Token signing secret; generated fresh when absent.
    pub token_secret: Option<Vec<u8>>,
    /// 32-byte field encryption key; generated fresh when absent. A fresh
    /// key cannot decrypt payloads sealed before a restart, so deployments
    /// should provision one.
    pub cipher_key: Option<[u8; 32]>,
    /// Regex overriding the default sensitive-field pattern.
    pub sensitive_pattern: Option<String>,
    /// Backup agent per task type, used on agent failure.
    pub backup_agents: HashMap<String, String>,
    /// Remote dispatch tuning.
    pub dispatch: DispatchOptions,
    /// Pause before requeueing a task with unmet dependencies.
    pub dependency_backoff: Duration,
    /// When set, audit events are also streamed to JSONL under this path.
    pub audit_dir: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Defaults for the given hosting card.
    pub fn new(card: AgentCard) -> Self {
        let dispatch = DispatchOptions {
            self_agent_id: card.agent_id.clone(),
            ..DispatchOptions::default()
        };
        Self {
            card,
            token_secret: None,
            cipher_key: None,
            sensitive_pattern: None,
            backup_agents: HashMap::new(),
            dispatch,
            dependency_backoff: Duration::from_secs(1),
            audit_dir: None,
        }
    }
}

/// Client-facing facade over the task lifecycle core.
///
/// Holds all owned state — store, queues, timers, registries, key material —
/// constructed once per process and shared by handle. There are no
/// module-level globals.
pub struct Orchestrator {
    card: AgentCard,
    store: Arc<TaskStore>,
    audit: Arc<AuditLog>,
    keyring: Arc<AgentKeyring>,
    tokens: Arc<TokenIssuer>,
    cipher: Arc<FieldCipher>,
    agents: Arc<AgentRegistry>,
    handlers: Arc<HandlerRegistry>,
    scheduler: Arc<PriorityScheduler>,
    timeouts: Arc<TimeoutMonitor>,
    engine: Arc<EscalationEngine>,
    review: Arc<ReviewQueue>,
    escalations: mpsc::UnboundedSender<EscalationEvent>,
}

impl Orchestrator {
    /// Wires all components and spawns the tier workers and the escalation
    /// worker. Must be called within a tokio runtime.
    pub fn start(
        config: OrchestratorConfig,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> TriagentResult<Arc<Self>> {
        let audit = Arc::new(match config.audit_dir {
            Some(dir) => AuditLog::with_dir(dir),
            None => AuditLog::in_memory(),
        });
        let store = Arc::new(TaskStore::new());
        let agents = Arc::new(AgentRegistry::new());
        let handlers = Arc::new(HandlerRegistry::new());
        let review = Arc::new(ReviewQueue::new());
        let keyring = Arc::new(AgentKeyring::new());

        let secret = config
            .token_secret
            .unwrap_or_else(|| FieldCipher::generate_key().to_vec());
        let tokens = Arc::new(TokenIssuer::new(secret));
        let key = config.cipher_key.unwrap_or_else(FieldCipher::generate_key);
        let cipher = Arc::new(FieldCipher::new(
            &key,
            config.sensitive_pattern.as_deref(),
        )?);

        let (esc_tx, esc_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(PriorityScheduler::new(
            store.clone(),
            audit.clone(),
            config.dependency_backoff,
        ));
        let timeouts = Arc::new(TimeoutMonitor::new(store.clone(), esc_tx.clone()));
        let engine = Arc::new(EscalationEngine::new(
            store.clone(),
            audit.clone(),
            review.clone(),
            notifier.unwrap_or_else(|| Arc::new(TracingNotifier)),
            timeouts.clone(),
            scheduler.clone(),
            config.backup_agents,
        ));
        engine.clone().spawn(esc_rx);

        let dispatcher = Arc::new(AgentDispatcher::new(
            store.clone(),
            agents.clone(),
            handlers.clone(),
            cipher.clone(),
            tokens.clone(),
            audit.clone(),
            timeouts.clone(),
            esc_tx.clone(),
            config.dispatch,
        ));
        scheduler.start(dispatcher, esc_tx.clone());

        info!(agent_id = %config.card.agent_id, "orchestrator started");
        Ok(Arc::new(Self {
            card: config.card,
            store,
            audit,
            keyring,
            tokens,
            cipher,
            agents,
            handlers,
            scheduler,
            timeouts,
            engine,
            review,
            escalations: esc_tx,
        }))
    }

    /// The hosting agent's card.
    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    /// Shared task store handle.
    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Shared audit log handle.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Human-review queue handle.
    pub fn review(&self) -> &Arc<ReviewQueue> {
        &self.review
    }

    /// Registers a local fallback handler for a task type.
    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.register(task_type, handler);
    }

    /// Registers an external agent card and provisions its API key.
    pub fn register_agent(&self, card: AgentCard) -> String {
        let api_key = self.keyring.register(&card.agent_id);
        self.audit.record_event(
            Uuid::nil(),
            EventType::AgentRegistered,
            None,
            Some(&card.agent_id),
            serde_json::json!({ "capabilities": card.capabilities }),
        );
        self.agents.register(card);
        api_key
    }

    /// Number of registered agents.
    pub fn registered_agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Verifies an agent/API-key pair, auditing the decision.
    pub fn verify_api_key(&self, agent_id: &str, api_key: &str) -> bool {
        let granted = self.keyring.verify(agent_id, api_key);
        self.audit.record_event(
            Uuid::nil(),
            if granted {
                EventType::AuthGranted
            } else {
                EventType::AuthDenied
            },
            None,
            Some(agent_id),
            serde_json::json!({ "method": "api_key" }),
        );
        granted
    }

    /// Exchanges a valid API key for a capability-scoped token.
    ///
    /// The token is scoped to the capabilities on the agent's registered
    /// card.
    pub fn issue_token(&self, agent_id: &str, api_key: &str) -> TriagentResult<SignedToken> {
        if !self.verify_api_key(agent_id, api_key) {
            return Err(TriagentError::Authentication("invalid API key".into()));
        }
        let capabilities = self
            .agents
            .get(agent_id)
            .map(|card| card.capabilities)
            .unwrap_or_default();
        let token = self.tokens.issue(agent_id, capabilities, None)?;
        self.audit.record_event(
            Uuid::nil(),
            EventType::TokenIssued,
            None,
            Some(agent_id),
            serde_json::json!({ "expires_in": token.expires_in }),
        );
        Ok(token)
    }

    /// Validates a bearer token's signature and expiry.
    pub fn validate_token(&self, token: &str) -> TriagentResult<TokenClaims> {
        self.tokens.validate(token)
    }

    /// Creates, registers, arms, and enqueues one task.
    pub fn create_task(
        &self,
        source_agent_id: &str,
        spec: TaskSpec,
        context: Option<MedicalContext>,
        case_id: Option<Uuid>,
    ) -> TriagentResult<Task> {
        if spec.task_type.trim().is_empty() {
            return Err(TriagentError::Validation(
                "task_type must not be empty".into(),
            ));
        }
        if spec.target_agent_id.trim().is_empty() {
            return Err(TriagentError::Validation(
                "target_agent_id must not be empty".into(),
            ));
        }
        let priority = spec
            .priority
            .or_else(|| context.as_ref().map(|c| c.case_priority))
            .unwrap_or(TaskPriority::Normal);

        let mut payload = spec.payload;
        self.cipher.seal_payload(&mut payload)?;

        let mut task = Task::new(
            source_agent_id,
            spec.target_agent_id,
            spec.task_type,
            payload,
            priority,
        )
        .with_dependencies(spec.depends_on);
        if let Some(secs) = spec.timeout_override {
            task = task.with_timeout(secs);
        }
        if let Some(context) = context {
            task = task.with_context(context);
        }
        if let Some(case_id) = case_id {
            task = task.with_case(case_id);
        }

        let task = self.store.create(task)?;
        self.audit.record_event(
            task.task_id,
            EventType::TaskCreated,
            Some(task.stage),
            Some(source_agent_id),
            serde_json::json!({
                "task_type": task.task_type,
                "priority": task.priority.to_string(),
                "target": task.target_agent_id,
            }),
        );
        self.timeouts.arm(&task);
        self.scheduler.enqueue(&task)?;
        Ok(task)
    }

    /// Creates one task per spec under a fresh case id.
    ///
    /// `depends_on_specs` indices must point at earlier specs in the slice.
    pub fn submit_case(
        &self,
        context: MedicalContext,
        specs: Vec<TaskSpec>,
    ) -> TriagentResult<Uuid> {
        if specs.is_empty() {
            return Err(TriagentError::Validation(
                "a case must contain at least one task".into(),
            ));
        }
        let case_id = Uuid::new_v4();
        let mut created: Vec<Uuid> = Vec::with_capacity(specs.len());
        for mut spec in specs {
            for index in std::mem::take(&mut spec.depends_on_specs) {
                let dep = created.get(index).copied().ok_or_else(|| {
                    TriagentError::Config(format!(
                        "spec dependency index {index} does not point at an earlier spec"
                    ))
                })?;
                spec.depends_on.push(dep);
            }
            let task = self.create_task(
                &self.card.agent_id,
                spec,
                Some(context.clone()),
                Some(case_id),
            )?;
            created.push(task.task_id);
        }
        info!(case_id = %case_id, tasks = created.len(), "case submitted");
        Ok(case_id)
    }

    /// Waits until every task of the case is terminal or the deadline
    /// elapses, then merges the individual results.
    ///
    /// A case id with no tasks (unknown, or fully archived) consolidates
    /// immediately as an empty result.
    pub async fn await_case(&self, case_id: Uuid, deadline: Duration) -> ConsolidatedResult {
        let started = tokio::time::Instant::now();
        loop {
            let tasks = self.store.list_by_case(case_id);
            if tasks.iter().all(Task::is_terminal) {
                return Self::consolidate(case_id, &tasks, false);
            }
            if started.elapsed() >= deadline {
                return Self::consolidate(case_id, &tasks, true);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    fn consolidate(case_id: Uuid, tasks: &[Task], deadline_exceeded: bool) -> ConsolidatedResult {
        let reports: Vec<CaseReport> = tasks.iter().map(CaseReport::from).collect();
        ConsolidatedResult {
            case_id,
            total_tasks: tasks.len(),
            completed: count(tasks, TaskStatus::Completed),
            failed: count(tasks, TaskStatus::Failed),
            cancelled: count(tasks, TaskStatus::Cancelled),
            pending: tasks.iter().filter(|t| !t.is_terminal()).count(),
            escalated: tasks.iter().filter(|t| t.escalated).count(),
            deadline_exceeded,
            reports,
        }
    }

    /// Records a status reported out-of-band, e.g. by a local handler over
    /// the HTTP surface. Returns the task as stored afterwards.
    pub fn report_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        outcome: Option<TaskOutcome>,
    ) -> TriagentResult<Task> {
        let updated = self.store.update_status(task_id, status, outcome)?;
        if updated {
            if status.is_terminal() {
                self.timeouts.cancel(task_id);
            }
            self.audit.record_event(
                task_id,
                EventType::StatusChanged,
                None,
                None,
                serde_json::json!({ "to": status }),
            );
        }
        self.store.get(task_id)
    }

    /// Posts a manual escalation, independent of the task's status.
    pub fn escalate_manual(&self, task_id: Uuid, reason: impl Into<String>) -> TriagentResult<()> {
        self.store.get(task_id)?;
        self.escalations
            .send(EscalationEvent::new(
                task_id,
                EscalationTrigger::ManualRequest,
                reason.into(),
            ))
            .map_err(|_| TriagentError::Config("escalation worker stopped".into()))
    }

    /// Cancels a non-terminal task. Returns `false` when already terminal.
    pub fn cancel_task(&self, task_id: Uuid) -> TriagentResult<bool> {
        let cancelled = self
            .store
            .update_status(task_id, TaskStatus::Cancelled, None)?;
        if cancelled {
            self.timeouts.cancel(task_id);
            self.audit.record_event(
                task_id,
                EventType::StatusChanged,
                None,
                None,
                serde_json::json!({ "to": "cancelled" }),
            );
        }
        Ok(cancelled)
    }

    /// Archives and removes terminal tasks older than `max_age`, auditing
    /// each removal.
    pub fn archive_older_than(&self, max_age: chrono::Duration) -> usize {
        let archived = self.store.purge_older_than(max_age);
        for task_id in &archived {
            self.audit.record_event(
                *task_id,
                EventType::TaskArchived,
                None,
                None,
                serde_json::Value::Null,
            );
        }
        archived.len()
    }

    /// Snapshot for the status endpoint.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            registered_agents: self.agents.len(),
            pending_tasks: self.store.pending_count(),
            total_tasks: self.store.total_count(),
            failure_counts: self.engine.failure_counts(),
        }
    }
}

fn count(tasks: &[Task], status: TaskStatus) -> usize {
    tasks.iter().filter(|t| t.status == status).count()
}
