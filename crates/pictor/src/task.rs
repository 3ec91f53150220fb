//! # Retrieval Tasks
//!
//! The cancellable handle returned by every retrieve call. A task moves
//! from `Created` to `Downloading` only if a network fetch actually
//! starts, and to `Terminal` when the request is satisfied, fails, or is
//! cancelled. Cancelling before a download handle exists is remembered:
//! the eventual attach cancels the token immediately and no network work
//! proceeds.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a retrieval task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPhase {
    /// Created, no download started yet.
    #[default]
    Created,
    /// A download is in flight and its cancellation token is attached.
    Downloading,
    /// Finished: satisfied, failed, or cancelled.
    Terminal,
}

#[derive(Debug, Default)]
struct TaskState {
    phase: TaskPhase,
    token: Option<CancellationToken>,
    cancelled_before_start: bool,
}

/// Handle for one in-flight retrieval.
///
/// Clones share state; cancelling any clone cancels the request.
#[derive(Debug, Clone)]
pub struct RetrievalTask {
    inner: Arc<Mutex<TaskState>>,
}

static EMPTY_TASK: OnceLock<RetrievalTask> = OnceLock::new();

impl RetrievalTask {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TaskState::default())),
        }
    }

    /// The shared, already-terminal task used for no-op retrievals.
    ///
    /// Avoids allocating per call when there is nothing to do; cancelling
    /// it is a no-op.
    pub fn empty() -> RetrievalTask {
        EMPTY_TASK
            .get_or_init(|| {
                let task = RetrievalTask::new();
                task.finish();
                task
            })
            .clone()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> TaskPhase {
        self.inner.lock().phase
    }

    pub fn is_terminal(&self) -> bool {
        self.phase() == TaskPhase::Terminal
    }

    /// Whether cancellation has been requested for this task.
    pub fn is_cancelled(&self) -> bool {
        let state = self.inner.lock();
        state.cancelled_before_start
            || state
                .token
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    /// Request cancellation. Idempotent.
    ///
    /// In `Downloading` the attached token is signalled; the transport
    /// stops at its next poll and the request terminates with a
    /// cancellation error. In `Created` the intent is recorded so a later
    /// attach cancels immediately. In `Terminal` this is a no-op.
    pub fn cancel(&self) {
        let mut state = self.inner.lock();
        match state.phase {
            TaskPhase::Terminal => {}
            TaskPhase::Downloading => {
                if let Some(token) = &state.token {
                    token.cancel();
                }
            }
            TaskPhase::Created => {
                state.cancelled_before_start = true;
            }
        }
    }

    /// Attach the download's cancellation token, entering `Downloading`.
    ///
    /// Returns `false` if the task was cancelled before the download
    /// started (or already finished); in that case the token is cancelled
    /// immediately and the task is terminal.
    pub(crate) fn attach_download(&self, token: CancellationToken) -> bool {
        let mut state = self.inner.lock();
        if state.cancelled_before_start || state.phase == TaskPhase::Terminal {
            token.cancel();
            state.phase = TaskPhase::Terminal;
            return false;
        }
        state.token = Some(token);
        state.phase = TaskPhase::Downloading;
        true
    }

    /// Mark the task terminal and release the token.
    pub(crate) fn finish(&self) {
        let mut state = self.inner.lock();
        state.phase = TaskPhase::Terminal;
        state.token = None;
    }
}
