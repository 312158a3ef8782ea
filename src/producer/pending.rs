//! Pending request tracker
//!
//! Producer-side bookkeeping for requests that expect an answer. Each entry
//! holds the callback to run and a deadline. An answer runs the callback
//! with the data; a sweep runs it with `Error::Timeout` once the deadline has
//! passed and removes the entry.
//!
//! In `AnswerMode::Multiple` an answered entry stays in place so every
//! fanned-out copy of a command can answer, until the sweep or `remove`
//! takes it out.
//!
//! Callbacks always run outside the tracker lock, so they may call back
//! into the tracker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::utils::{Error, Result};

/// Called with the request id and either the answer or the failure.
pub type Callback = Arc<dyn Fn(u32, Result<Bytes>) + Send + Sync>;

/// How many answers one request expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// The first answer completes the request.
    #[default]
    Single,
    /// Keep accepting answers until the request times out.
    Multiple,
}

struct PendingRequest {
    payload: Bytes,
    callback: Callback,
    deadline: Instant,
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("len", &self.payload.len())
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct PendingRequestTracker {
    mode: AnswerMode,
    pending: RwLock<HashMap<u32, PendingRequest>>,
}

impl PendingRequestTracker {
    pub fn new(mode: AnswerMode) -> Self {
        Self {
            mode,
            pending: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> AnswerMode {
        self.mode
    }

    pub fn add(&self, id: u32, payload: Bytes, callback: Callback, timeout: Duration) {
        let request = PendingRequest {
            payload,
            callback,
            deadline: Instant::now() + timeout,
        };
        self.pending.write().insert(id, request);
    }

    /// Send `payload` with `send` and track the id it returns. The write lock
    /// is held across the send, so an answer racing back is only looked up
    /// once the entry exists. Nothing is tracked when the send fails.
    pub fn track<F>(
        &self,
        payload: Bytes,
        callback: Callback,
        timeout: Duration,
        send: F,
    ) -> Result<u32>
    where
        F: FnOnce(Bytes) -> Result<u32>,
    {
        let mut pending = self.pending.write();
        let id = send(payload.clone())?;
        pending.insert(
            id,
            PendingRequest {
                payload,
                callback,
                deadline: Instant::now() + timeout,
            },
        );
        Ok(id)
    }

    /// Deliver an answer for request `id`.
    pub fn on_answer(&self, id: u32, data: Bytes) -> Result<()> {
        let callback = {
            let mut pending = self.pending.write();
            match self.mode {
                AnswerMode::Single => pending.remove(&id).map(|r| r.callback),
                AnswerMode::Multiple => pending.get(&id).map(|r| r.callback.clone()),
            }
        }
        .ok_or(Error::MessageNotFound)?;

        callback(id, Ok(data));
        Ok(())
    }

    /// Forget request `id` without running its callback.
    pub fn remove(&self, id: u32) -> bool {
        self.pending.write().remove(&id).is_some()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.pending.read().contains_key(&id)
    }

    /// Fail and remove every request whose deadline is at or before `now`.
    /// Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.pending.write().retain(|id, request| {
            if request.deadline <= now {
                expired.push((*id, request.callback.clone()));
                false
            } else {
                true
            }
        });

        for (id, callback) in &expired {
            callback(*id, Err(Error::Timeout(*id)));
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.pending.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
