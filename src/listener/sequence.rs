//! Resumption cursor for the server-side delta queue
//!
//! The tracker owns the sync token and sequence id, decides between creating
//! and resuming the queue, and holds the single "waiting for a sequence id"
//! slot. Nothing outside this module mutates the cursor.

use crate::protocol::control::{ControlFrame, QueueParams, QueueRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Snapshot of the resumption cursor
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SequenceState {
    pub sync_token: Option<String>,
    pub sequence_id: Option<u64>,
}

/// What the caller should do with a control frame after the tracker saw it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Bookkeeping only; do not translate
    Consumed,
    /// Queue lost; a resync is now pending and the frame is consumed
    Invalidated,
    /// Pass the frame on to the translator
    Continue,
}

/// Receiving end of the pending sequence wait
///
/// Resolves with `None` when a newer wait replaced this one or the tracker
/// was dropped.
#[derive(Debug)]
pub struct SequenceWait {
    rx: oneshot::Receiver<u64>,
}

impl SequenceWait {
    pub async fn wait(self) -> Option<u64> {
        self.rx.await.ok()
    }
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    state: SequenceState,
    resync_pending: bool,
    waiter: Option<oneshot::Sender<u64>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker starting from an already known sequence id
    pub fn with_seed(sequence_id: Option<u64>) -> Self {
        Self {
            state: SequenceState {
                sync_token: None,
                sequence_id,
            },
            ..Self::default()
        }
    }

    pub fn sequence_id(&self) -> Option<u64> {
        self.state.sequence_id
    }

    pub fn sync_token(&self) -> Option<&str> {
        self.state.sync_token.as_deref()
    }

    pub fn state(&self) -> &SequenceState {
        &self.state
    }

    /// Install the pending wait, replacing any earlier one
    pub fn begin_wait(&mut self) -> SequenceWait {
        let (tx, rx) = oneshot::channel();
        if self.waiter.replace(tx).is_some() {
            debug!("Replacing an earlier sequence id wait");
        }
        SequenceWait { rx }
    }

    /// Whether a wait is installed and unresolved
    pub fn is_waiting(&self) -> bool {
        self.waiter.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Seed the sequence id from outside the control channel
    ///
    /// Only a pending wait or an empty cursor accepts a seed; once the cursor
    /// is known the server's sequence ids are authoritative and the call is
    /// ignored.
    pub fn set_sequence_id(&mut self, sequence_id: u64) {
        if self.is_waiting() {
            debug!(sequence_id, "Got expected sequence id, waking up listener");
        } else if let Some(current) = self.state.sequence_id {
            warn!(
                current,
                received = sequence_id,
                "Got unexpected sequence id, keeping the current cursor"
            );
            return;
        } else {
            debug!(sequence_id, "Got sequence id while not waiting for one");
        }
        self.state.sequence_id = Some(sequence_id);
        self.resolve_wait(sequence_id);
    }

    /// Update the cursor from a control-topic frame
    pub fn on_control_frame(&mut self, frame: &ControlFrame) -> ControlOutcome {
        match frame {
            ControlFrame::QueueCreated {
                sync_token,
                first_delta_seq_id,
            } => {
                debug!(sequence_id = first_delta_seq_id, "Messenger sync queue created");
                self.state.sync_token = Some(sync_token.clone());
                self.state.sequence_id = Some(*first_delta_seq_id);
                self.resolve_wait(*first_delta_seq_id);
                ControlOutcome::Consumed
            }
            ControlFrame::QueueInvalidated { code } => {
                warn!(
                    code = %code,
                    "The MQTT listener was disconnected for too long, events may have been lost"
                );
                self.state = SequenceState::default();
                self.resync_pending = true;
                ControlOutcome::Invalidated
            }
            ControlFrame::ServerError { code } => {
                error!(code = %code, "MQTT error code received");
                ControlOutcome::Consumed
            }
            ControlFrame::Deltas { last_issued_seq_id } => {
                match self.state.sequence_id {
                    Some(current) if *last_issued_seq_id < current => {
                        warn!(
                            current,
                            received = last_issued_seq_id,
                            "Ignoring sequence id lower than the current one"
                        );
                    }
                    _ => self.state.sequence_id = Some(*last_issued_seq_id),
                }
                ControlOutcome::Continue
            }
            ControlFrame::Other => ControlOutcome::Continue,
        }
    }

    pub fn resync_pending(&self) -> bool {
        self.resync_pending
    }

    /// Clear the pending resync flag, returning whether it was set
    pub fn take_resync(&mut self) -> bool {
        std::mem::take(&mut self.resync_pending)
    }

    /// Create-or-resume request for the current cursor (pure function)
    pub fn queue_request(&self, user_id: &str) -> QueueRequest {
        let params = QueueParams::new(user_id);
        match &self.state.sync_token {
            Some(token) => QueueRequest::Resume {
                params,
                last_seq_id: self.state.sequence_id,
                sync_token: token.clone(),
            },
            None => QueueRequest::Create {
                params,
                initial_titan_sequence_id: self.state.sequence_id,
            },
        }
    }

    fn resolve_wait(&mut self, sequence_id: u64) {
        if let Some(tx) = self.waiter.take() {
            // The receiver may have given up; nothing else to do then
            let _ = tx.send(sequence_id);
        }
    }
}
