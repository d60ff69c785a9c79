//! Command Dispatch Queue
//!
//! Outgoing commands wait here until the vehicle acknowledges them. The queue
//! is ordered by opcode, lowest first, so navigation commands go out ahead of
//! configuration commands. Only the head is ever in flight: it is resent on
//! every tick until an acknowledgement settles it or the retry budget runs
//! out.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::protocol::ProtocolError;

/// Retries after the first send before a command is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Acknowledgement state of a queued command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AckStatus {
    /// No acknowledgement received yet
    Pending,
    /// Command accepted
    Accepted,
    /// Supported, but not possible right now
    TemporarilyRejected,
    /// Rejected
    Denied,
    /// Not supported by the vehicle
    Unsupported,
    /// Received, but execution failed
    Failed,
    /// A result code this implementation does not know
    Unknown,
}

impl AckStatus {
    /// Map a COMMAND_ACK result code
    pub fn from_result_code(code: u8) -> Self {
        match code {
            0 => AckStatus::Accepted,
            1 => AckStatus::TemporarilyRejected,
            2 => AckStatus::Denied,
            3 => AckStatus::Unsupported,
            4 => AckStatus::Failed,
            _ => AckStatus::Unknown,
        }
    }

    /// Denied, unsupported or failed. Never retried.
    pub fn is_rejection(self) -> bool {
        matches!(
            self,
            AckStatus::Denied | AckStatus::Unsupported | AckStatus::Failed
        )
    }

    /// Human readable description
    pub fn description(self) -> &'static str {
        match self {
            AckStatus::Accepted => "Command accepted.",
            AckStatus::Failed => "Command was received, but failed.",
            AckStatus::Unsupported => "Command is not supported.",
            AckStatus::Denied => "Command was rejected by the vehicle.",
            AckStatus::TemporarilyRejected => {
                "Command was rejected by the vehicle, but is supported."
            }
            AckStatus::Pending | AckStatus::Unknown => "Command unknown.",
        }
    }
}

/// Final outcome of a command that did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command {opcode} rejected: {}", .status.description())]
    Rejected { opcode: u16, status: AckStatus },

    #[error("Command {opcode} not acknowledged after {attempts} attempts")]
    TimedOut { opcode: u16, attempts: u32 },

    #[error("Command was discarded before completion")]
    Cancelled,
}

/// A command waiting in the queue
#[derive(Debug)]
pub struct QueuedCommand {
    /// Command id, also the dispatch priority
    pub opcode: u16,
    /// Command parameters 1 to 7
    pub params: [f32; 7],
    /// Times sent so far
    pub attempts: u32,
    /// Last acknowledgement
    pub status: AckStatus,
    notify: Option<oneshot::Sender<Result<AckStatus, CommandError>>>,
}

impl QueuedCommand {
    fn resolve(&mut self, outcome: Result<AckStatus, CommandError>) {
        if let Some(tx) = self.notify.take() {
            // Caller may have dropped the handle
            let _ = tx.send(outcome);
        }
    }
}

/// Resolves once the command leaves the queue
#[derive(Debug)]
pub struct CommandHandle {
    opcode: u16,
    rx: oneshot::Receiver<Result<AckStatus, CommandError>>,
}

impl CommandHandle {
    /// Opcode of the submitted command
    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    /// Wait for the final outcome
    pub async fn wait(self) -> Result<AckStatus, CommandError> {
        self.rx.await.unwrap_or(Err(CommandError::Cancelled))
    }
}

/// Opcode and status of the most recently handled head
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastCommand {
    /// Command id
    pub opcode: u16,
    /// Acknowledgement state when last handled
    pub status: AckStatus,
    /// Human readable status
    pub description: &'static str,
}

/// What a single [`CommandQueue::tick`] did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Queue empty
    Idle,
    /// Head sent
    Sent { opcode: u16, attempt: u32 },
    /// Head could not be sent; it stays queued
    SendFailed { opcode: u16, attempt: u32 },
    /// Head accepted and removed
    Completed { opcode: u16 },
    /// Head rejected and removed
    Rejected { opcode: u16, status: AckStatus },
    /// Head dropped after the retry budget ran out
    Exhausted { opcode: u16, attempts: u32 },
}

#[derive(Debug, Default)]
struct QueueInner {
    // (opcode, insertion sequence) keeps equal opcodes in FIFO order
    pending: BTreeMap<(u16, u64), QueuedCommand>,
    next_seq: u64,
    last: Option<LastCommand>,
}

impl QueueInner {
    fn head_mut(&mut self) -> Option<&mut QueuedCommand> {
        self.pending.values_mut().next()
    }

    fn pop_head(&mut self) -> Option<QueuedCommand> {
        self.pending.pop_first().map(|(_, cmd)| cmd)
    }
}

/// Priority queue of outgoing commands
#[derive(Debug)]
pub struct CommandQueue {
    inner: RwLock<QueueInner>,
    max_retries: u32,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl CommandQueue {
    /// Create an empty queue with the given retry budget
    pub fn new(max_retries: u32) -> Self {
        Self {
            inner: RwLock::new(QueueInner::default()),
            max_retries,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a command. Duplicates are allowed and keep insertion order.
    pub fn push(&self, opcode: u16, params: [f32; 7]) -> CommandHandle {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.pending.insert(
            (opcode, seq),
            QueuedCommand {
                opcode,
                params,
                attempts: 0,
                status: AckStatus::Pending,
                notify: Some(tx),
            },
        );
        tracing::debug!(opcode, queued = inner.pending.len(), "Command queued");
        CommandHandle { opcode, rx }
    }

    /// Record an acknowledgement against the head. Ignored unless the head
    /// carries the same opcode.
    pub fn record_ack(&self, opcode: u16, status: AckStatus) -> bool {
        let mut inner = self.write();
        match inner.head_mut() {
            Some(head) if head.opcode == opcode => {
                head.status = status;
                true
            }
            Some(head) => {
                tracing::debug!(
                    opcode,
                    head = head.opcode,
                    "Acknowledgement does not match queue head"
                );
                false
            }
            None => false,
        }
    }

    /// Advance the queue by one step.
    ///
    /// Settled or exhausted heads are removed; otherwise the head is passed
    /// to `send` and its attempt count incremented, whether or not the send
    /// succeeded.
    pub fn tick<F>(&self, mut send: F) -> TickOutcome
    where
        F: FnMut(&QueuedCommand) -> Result<(), ProtocolError>,
    {
        let mut inner = self.write();
        let max_retries = self.max_retries;
        let Some(head) = inner.head_mut() else {
            return TickOutcome::Idle;
        };
        let opcode = head.opcode;
        let status = head.status;
        let attempts = head.attempts;

        let outcome = if status == AckStatus::Accepted {
            TickOutcome::Completed { opcode }
        } else if status.is_rejection() {
            TickOutcome::Rejected { opcode, status }
        } else if attempts > max_retries {
            TickOutcome::Exhausted { opcode, attempts }
        } else {
            let result = send(&*head);
            head.attempts += 1;
            let attempt = head.attempts;
            inner.last = Some(LastCommand {
                opcode,
                status,
                description: status.description(),
            });
            return match result {
                Ok(()) => TickOutcome::Sent { opcode, attempt },
                Err(e) => {
                    tracing::warn!(opcode, attempt, "Failed to send command: {}", e);
                    TickOutcome::SendFailed { opcode, attempt }
                }
            };
        };

        inner.last = Some(LastCommand {
            opcode,
            status,
            description: status.description(),
        });
        if let Some(mut done) = inner.pop_head() {
            match outcome {
                TickOutcome::Completed { .. } => {
                    tracing::info!(opcode, "Command accepted");
                    done.resolve(Ok(AckStatus::Accepted));
                }
                TickOutcome::Rejected { status, .. } => {
                    tracing::warn!(opcode, ?status, "Command rejected");
                    done.resolve(Err(CommandError::Rejected { opcode, status }));
                }
                _ => {
                    tracing::warn!(opcode, attempts, "Command not acknowledged, giving up");
                    done.resolve(Err(CommandError::TimedOut { opcode, attempts }));
                }
            }
        }
        outcome
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.read().pending.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.read().pending.is_empty()
    }

    /// Opcode, attempts and status of the head
    pub fn head(&self) -> Option<(u16, u32, AckStatus)> {
        let inner = self.read();
        inner
            .pending
            .values()
            .next()
            .map(|c| (c.opcode, c.attempts, c.status))
    }

    /// Most recently handled head
    pub fn last_command(&self) -> Option<LastCommand> {
        self.read().last.clone()
    }

    /// Forget the most recently handled head
    pub fn clear_last(&self) {
        self.write().last = None;
    }
}
