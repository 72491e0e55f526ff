//! Shared background runtime for blocking entry points.
//!
//! [`EvalFunction::call`](crate::EvalFunction::call) may be used from plain
//! synchronous code or from inside another runtime. Either way the work is
//! handed to one process-wide multi-thread runtime and the result comes back
//! over a channel, so no caller ever nests runtimes or spins up a thread per
//! call.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Runtime};

use crate::error::{EvalError, Result};

static RUNTIME: OnceLock<std::result::Result<Runtime, String>> = OnceLock::new();

fn runtime() -> Result<&'static Runtime> {
    RUNTIME
        .get_or_init(|| {
            Builder::new_multi_thread()
                .worker_threads(2)
                .thread_name("casebench-bg")
                .enable_all()
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| EvalError::Runtime(e.clone()))
}

/// Run `fut` on the shared runtime and block the current thread until it
/// finishes.
pub fn block_on<F>(fut: F) -> Result<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let (tx, rx) = std::sync::mpsc::channel();
    runtime()?.spawn(async move {
        let _ = tx.send(fut.await);
    });
    rx.recv()
        .map_err(|_| EvalError::Runtime("background task dropped its result".to_string()))
}
