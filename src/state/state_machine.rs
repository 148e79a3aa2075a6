use std::time::Instant;

use thiserror::Error;
use uuid::Uuid;

use crate::state::session::SessionStatus;

/// Events that can be applied to a session's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// First player joined a freshly created session.
    PlayerJoined,
    /// Host starts the game from the lobby.
    Start,
    /// Game halted by the host or because the host dropped.
    Pause(String),
    /// Host resumes a paused game.
    Resume,
    /// Game over, either on request or once the last round completed.
    End(String),
}

/// Error returned when an event cannot be applied from the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot apply {event:?} while the session is {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the event was received.
    pub from: SessionStatus,
    /// The rejected event.
    pub event: SessionEvent,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The requested transition is not valid from the current status.
    InvalidTransition(InvalidTransition),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// Status changed since the plan was created.
    StatusMismatch {
        /// Status when the plan was created.
        expected: SessionStatus,
        /// Current status.
        actual: SessionStatus,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition that has not been applied yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Plan identifier handed back to `apply` or `abort`.
    pub id: PlanId,
    /// Status before the transition.
    pub from: SessionStatus,
    /// Status after the transition.
    pub to: SessionStatus,
    /// Event that triggered it.
    pub event: SessionEvent,
    /// Version the machine reaches once applied.
    pub version_next: usize,
    /// When the plan was made.
    pub pending_since: Instant,
}

/// Lifecycle of one session: created → lobby → active ⇄ paused → completed.
///
/// Transitions are two-phase so the caller can persist the new state before
/// committing it, and abort if persistence fails.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    status: SessionStatus,
    version: usize,
    pending: Option<Plan>,
}

impl SessionStateMachine {
    /// Machine positioned at `status`, e.g. for a session loaded from the store.
    pub fn from_status(status: SessionStatus) -> Self {
        Self {
            status,
            version: 0,
            pending: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Number of transitions applied so far.
    pub fn version(&self) -> usize {
        self.version
    }

    /// Validate `event` against the current status and stage the transition.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let next = self
            .compute_transition(&event)
            .map_err(PlanError::InvalidTransition)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.status,
            to: next,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Commit a staged plan.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionStatus, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.status != plan.from {
            return Err(ApplyError::StatusMismatch {
                expected: plan.from,
                actual: self.status,
            });
        }

        self.status = plan.to;
        self.version = plan.version_next;
        Ok(self.status)
    }

    /// Drop a staged plan, leaving the status untouched.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;
        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }
        self.pending = None;
        Ok(())
    }

    fn compute_transition(&self, event: &SessionEvent) -> Result<SessionStatus, InvalidTransition> {
        let next = match (self.status, event) {
            (SessionStatus::Created, SessionEvent::PlayerJoined) => SessionStatus::Lobby,
            (SessionStatus::Lobby, SessionEvent::Start) => SessionStatus::Active,
            (SessionStatus::Active, SessionEvent::Pause(_)) => SessionStatus::Paused,
            (SessionStatus::Paused, SessionEvent::Resume) => SessionStatus::Active,
            (SessionStatus::Active | SessionStatus::Paused, SessionEvent::End(_)) => {
                SessionStatus::Completed
            }
            (from, event) => {
                return Err(InvalidTransition {
                    from,
                    event: event.clone(),
                });
            }
        };
        Ok(next)
    }
}
