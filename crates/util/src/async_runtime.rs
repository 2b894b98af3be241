//! Bridge from the synchronous engine to async provider clients.
//!
//! The engine polls services from a single thread of control; providers that speak
//! HTTP are async. [`block_on_future`] runs one provider call to completion, reusing
//! the Tokio runtime entered by the binary when one exists.

use anyhow::anyhow;
use std::future::Future;
use tokio::{runtime::Handle, task};

/// Execute an async future from synchronous code.
///
/// # Arguments
/// - `future`: The future to run to completion.
///
/// # Returns
/// Returns the future's output or an error if a Tokio runtime cannot be created.
///
/// # Notes
/// - Reuses the current runtime when available, so connection pools survive
///   between poll iterations.
/// - Falls back to a throwaway single-threaded runtime outside Tokio.
pub fn block_on_future<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        task::block_in_place(|| handle.block_on(future))
    } else {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| anyhow!(error))?
            .block_on(future)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_future_without_ambient_runtime() {
        let value = block_on_future(async { Ok::<_, anyhow::Error>(41 + 1) }).expect("future completes");
        assert_eq!(value, 42);
    }

    #[test]
    fn runs_future_inside_entered_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("build runtime");
        let _guard = runtime.enter();
        let value = block_on_future(async {
            tokio::task::yield_now().await;
            Ok::<_, anyhow::Error>("done")
        })
        .expect("future completes");
        assert_eq!(value, "done");
    }
}
