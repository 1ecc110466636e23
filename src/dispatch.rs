//! Serialized completion context.
//!
//! Every completion of a `Recognizer` runs on one dedicated thread, in the
//! order the batches finished. Consumers can rely on never seeing two
//! completions at the same time.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread::{self, ThreadId};

use anyhow::{anyhow, Context, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Owner of the completion thread.
///
/// The thread exits once the queue and every `CompletionHandle` are dropped,
/// i.e. after in-flight recognition calls have delivered.
pub struct CompletionQueue {
    handle: CompletionHandle,
    thread_id: ThreadId,
}

impl CompletionQueue {
    pub fn spawn(name: &str) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for job in receiver {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        log::error!("completion callback panicked");
                    }
                }
            })
            .with_context(|| format!("failed to spawn completion thread '{}'", name))?;
        Ok(Self {
            handle: CompletionHandle { sender },
            thread_id: worker.thread().id(),
        })
    }

    pub fn handle(&self) -> CompletionHandle {
        self.handle.clone()
    }

    pub fn post<F: FnOnce() + Send + 'static>(&self, job: F) -> Result<()> {
        self.handle.post(job)
    }

    /// Thread on which every posted job runs.
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }
}

/// Cloneable sender half of a `CompletionQueue`.
#[derive(Clone)]
pub struct CompletionHandle {
    sender: mpsc::Sender<Job>,
}

impl CompletionHandle {
    pub fn post<F: FnOnce() + Send + 'static>(&self, job: F) -> Result<()> {
        self.sender
            .send(Box::new(job))
            .map_err(|_| anyhow!("completion queue closed"))
    }
}
