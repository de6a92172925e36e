//! Per-user interactive trim sessions.
//!
//! An explicit state machine tracks start/end offset selection across
//! independent interactions. The store is injected into the pipeline rather
//! than held as ambient state, and map access goes through one async mutex so
//! same-user interactions serialize; no I/O ever happens under the lock.

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::delivery::UserId;
use crate::{PipelineError, Result};

pub mod offsets;

/// The audio a session will cut, with its known total duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    /// Platform file id, URL, or local path, resolved through the delivery
    /// boundary at confirmation time
    pub file_ref: String,

    /// Total duration in seconds
    pub duration_secs: u64,
}

/// Trim session states. Terminal sessions are dropped from the store, so a
/// later interaction finds nothing and reports `SessionNotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimState {
    AwaitingStart,
    AwaitingEnd,
    ReadyToConfirm,
}

#[derive(Debug, Clone)]
struct TrimSession {
    source: AudioSource,
    start_secs: Option<u64>,
    end_secs: Option<u64>,
    state: TrimState,
}

/// What the caller should render after driving the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrimReply {
    /// Session is waiting for a start offset
    PickStart { duration_secs: u64 },

    /// Start chosen; waiting for an end offset
    PickEnd { duration_secs: u64, start_secs: u64 },

    /// Both bounds chosen; end may still be revised before confirming
    ReadyToConfirm {
        duration_secs: u64,
        start_secs: u64,
        end_secs: u64,
    },

    /// Session aborted by the user
    Cancelled,
}

/// Confirmation outcome: either a cut to execute or the explicit disposition
/// telling the user which bound is still missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Plan(CutPlan),
    StartRequired,
    EndRequired,
}

/// A fully specified cut request produced by a confirmed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutPlan {
    pub source: AudioSource,
    pub start_secs: u64,
    pub end_secs: u64,
}

/// Keyed store of active trim sessions, one per user.
#[derive(Debug, Default)]
pub struct TrimSessions {
    sessions: Mutex<HashMap<UserId, TrimSession>>,
}

impl TrimSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session in `AwaitingStart`, replacing any previous session
    /// for this user.
    pub async fn begin(&self, user: UserId, source: AudioSource) -> TrimReply {
        let duration_secs = source.duration_secs;
        let mut sessions = self.sessions.lock().await;
        let replaced = sessions
            .insert(
                user,
                TrimSession {
                    source,
                    start_secs: None,
                    end_secs: None,
                    state: TrimState::AwaitingStart,
                },
            )
            .is_some();
        if replaced {
            tracing::debug!("Replaced existing trim session for user {:?}", user);
        }
        TrimReply::PickStart { duration_secs }
    }

    /// Choose the start offset. Only transitions out of `AwaitingStart`; in
    /// any other state the current step is re-rendered unchanged.
    pub async fn select_start(&self, user: UserId, secs: u64) -> Result<TrimReply> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&user)
            .ok_or(PipelineError::SessionNotFound)?;

        if secs >= session.source.duration_secs {
            anyhow::bail!(
                "Start time ({}) is beyond audio duration ({}s)",
                crate::timecode::format(secs),
                session.source.duration_secs
            );
        }

        if session.state == TrimState::AwaitingStart {
            session.start_secs = Some(secs);
            session.state = TrimState::AwaitingEnd;
        }
        Ok(render(session))
    }

    /// Choose or revise the end offset. From `AwaitingStart` this is a no-op
    /// re-render (the start is still required).
    pub async fn select_end(&self, user: UserId, secs: u64) -> Result<TrimReply> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(&user)
            .ok_or(PipelineError::SessionNotFound)?;

        if secs > session.source.duration_secs {
            anyhow::bail!(
                "End time ({}) is beyond audio duration ({}s)",
                crate::timecode::format(secs),
                session.source.duration_secs
            );
        }

        match session.state {
            TrimState::AwaitingEnd | TrimState::ReadyToConfirm => {
                session.end_secs = Some(secs);
                session.state = TrimState::ReadyToConfirm;
            }
            TrimState::AwaitingStart => {}
        }
        Ok(render(session))
    }

    /// Validate and yield the cut plan.
    ///
    /// Before both bounds are chosen this is a no-op returning the explicit
    /// missing-bound disposition. With `end <= start` the session is rejected
    /// with `InvalidRange` and stays in `ReadyToConfirm` so the user can
    /// revise the end. The session transitions to completed only via
    /// [`TrimSessions::complete`], after the cut actually succeeded.
    pub async fn confirm(&self, user: UserId) -> Result<ConfirmOutcome> {
        let sessions = self.sessions.lock().await;
        let session = sessions.get(&user).ok_or(PipelineError::SessionNotFound)?;

        let Some(start_secs) = session.start_secs else {
            return Ok(ConfirmOutcome::StartRequired);
        };
        let Some(end_secs) = session.end_secs else {
            return Ok(ConfirmOutcome::EndRequired);
        };
        if end_secs <= start_secs {
            return Err(PipelineError::InvalidRange.into());
        }

        Ok(ConfirmOutcome::Plan(CutPlan {
            source: session.source.clone(),
            start_secs,
            end_secs,
        }))
    }

    /// Terminal success transition; the session becomes unreachable.
    pub async fn complete(&self, user: UserId) -> Result<()> {
        self.sessions
            .lock()
            .await
            .remove(&user)
            .map(|_| ())
            .ok_or_else(|| PipelineError::SessionNotFound.into())
    }

    /// Terminal abort transition; the session becomes unreachable.
    pub async fn cancel(&self, user: UserId) -> Result<TrimReply> {
        self.sessions
            .lock()
            .await
            .remove(&user)
            .map(|_| TrimReply::Cancelled)
            .ok_or_else(|| PipelineError::SessionNotFound.into())
    }

    /// Current state, if the user has an active session.
    pub async fn state_of(&self, user: UserId) -> Option<TrimState> {
        self.sessions.lock().await.get(&user).map(|s| s.state)
    }
}

fn render(session: &TrimSession) -> TrimReply {
    match session.state {
        TrimState::AwaitingStart => TrimReply::PickStart {
            duration_secs: session.source.duration_secs,
        },
        TrimState::AwaitingEnd => TrimReply::PickEnd {
            duration_secs: session.source.duration_secs,
            start_secs: session.start_secs.unwrap_or(0),
        },
        TrimState::ReadyToConfirm => TrimReply::ReadyToConfirm {
            duration_secs: session.source.duration_secs,
            start_secs: session.start_secs.unwrap_or(0),
            end_secs: session.end_secs.unwrap_or(0),
        },
    }
}
