// src/runtime.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Thread-safe, blocking bridge onto a single global multi-thread Tokio
//! runtime. The provider API is synchronous; every remote call hops onto this
//! runtime and blocks the calling thread until the future resolves.

use anyhow::Result;
use std::sync::mpsc;
use std::thread;
use tokio::runtime::{Builder as TokioBuilder, Handle};
use tokio::sync::oneshot;

static RT_HANDLE: once_cell::sync::OnceCell<Handle> = once_cell::sync::OnceCell::new();

// Create (once) a background multi-thread Tokio runtime and return its Handle.
fn global_rt_handle() -> &'static Handle {
    RT_HANDLE.get_or_init(|| {
        let (tx, rx) = mpsc::sync_channel(1);
        thread::Builder::new()
            .name("lakestore-rt".to_string())
            .spawn(move || {
                let threads = runtime_threads();
                log::debug!("Creating Tokio runtime with {} worker threads", threads);

                let rt = TokioBuilder::new_multi_thread()
                    .enable_io()
                    .enable_time()
                    .worker_threads(threads)
                    .thread_name("lakestore-rt-worker")
                    .build()
                    .expect("failed to build global tokio runtime");

                // Send a Handle clone back to the creator, then park the runtime forever.
                let handle = rt.handle().clone();
                tx.send(handle).expect("send runtime handle");
                rt.block_on(async { std::future::pending::<()>().await });
            })
            .expect("failed to spawn lakestore runtime thread");

        rx.recv().expect("receive runtime handle")
    })
}

/// Worker-thread count, overridable via `LAKESTORE_RT_THREADS`.
fn runtime_threads() -> usize {
    std::env::var("LAKESTORE_RT_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| {
            let cores = num_cpus::get();
            std::cmp::min(std::cmp::max(4, cores), 16)
        })
}

/// Run an async `fut` on the global runtime and block the **current** thread
/// until it completes. Handles both runtime and non-runtime contexts.
pub fn run_on_global_rt<F, T>(fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(_) => {
            // Already inside some runtime: still execute on our global one and
            // wait through a plain channel, which is safe to block on here.
            let handle = global_rt_handle().clone();
            let (tx, rx) = std::sync::mpsc::channel();

            handle.spawn(async move {
                let result = fut.await;
                let _ = tx.send(result);
            });

            rx.recv()
                .map_err(|_| anyhow::anyhow!("global runtime task crashed: RecvError(())"))?
        }
        Err(_) => {
            let handle = global_rt_handle().clone();
            let (tx, rx) = oneshot::channel();

            handle.spawn(async move {
                let _ = tx.send(fut.await);
            });

            // Block this plain OS thread until the async result arrives.
            rx.blocking_recv()
                .map_err(|_| anyhow::anyhow!("global runtime task crashed: RecvError(())"))?
        }
    }
}
