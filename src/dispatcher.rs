//! Runtime that drives calls made outside of an async context.

use std::future::Future;

use log::debug;
use once_cell::sync::OnceCell;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{Error, Result};

/// Lazily started multi-threaded tokio runtime.
///
/// Async calls prefer the runtime they are enqueued from; the dispatcher's own runtime is only
/// started the first time a call needs it.
pub struct Dispatcher {
    threads: Option<usize>,
    runtime: OnceCell<Runtime>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            threads: None,
            runtime: OnceCell::new(),
        }
    }

    /// Uses `threads` worker threads instead of one per core.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads: Some(threads.max(1)),
            runtime: OnceCell::new(),
        }
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime.get_or_try_init(|| {
            let mut builder = Builder::new_multi_thread();
            builder.enable_all().thread_name("reqchain-dispatcher");
            if let Some(threads) = self.threads {
                builder.worker_threads(threads);
            }
            debug!("dispatcher: starting runtime ({:?} workers)", self.threads);
            builder.build().map_err(Error::Dispatcher)
        })
    }

    /// Handle to spawn calls on: the ambient runtime if there is one, else our own.
    pub fn handle(&self) -> Result<Handle> {
        match Handle::try_current() {
            Ok(handle) => Ok(handle),
            Err(_) => Ok(self.runtime()?.handle().clone()),
        }
    }

    /// Runs `future` to completion, blocking the calling thread.
    ///
    /// Inside a runtime the future is driven from a helper thread, since a runtime cannot be
    /// blocked on from one of its own tasks.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let runtime = self.runtime()?;
        if Handle::try_current().is_err() {
            return Ok(runtime.block_on(future));
        }

        std::thread::scope(|scope| {
            match scope.spawn(|| runtime.block_on(future)).join() {
                Ok(output) => Ok(output),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("threads", &self.threads)
            .field("started", &self.runtime.get().is_some())
            .finish()
    }
}
