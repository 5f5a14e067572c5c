use std::future::Future;

use docbench_core::prelude::{InterruptHandle, InterruptedError};
use tokio::signal;

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
    interrupt_handle: InterruptHandle,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, interrupt_handle: InterruptHandle) -> Self {
        Self {
            runtime,
            interrupt_handle,
        }
    }

    /// Create an executor on a fresh runtime that listens for Ctrl-C.
    pub fn start() -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        let interrupt_handle = start_interrupt_listener(&runtime);
        Ok(Self::new(runtime, interrupt_handle))
    }

    /// Run async code in place, blocking until it completes.
    ///
    /// The future is cancelled if the run is interrupted, in which case an [InterruptedError] is
    /// returned. Submitting a future which does not support cancelling may prevent the harness
    /// from stopping promptly.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        let mut interrupt_listener = self.interrupt_handle.new_listener();
        self.runtime.block_on(async move {
            tokio::select! {
                result = fut => result,
                _ = interrupt_listener.wait_for_interrupt() => {
                    Err(anyhow::anyhow!(InterruptedError::default()))
                },
            }
        })
    }

    /// Submit async code to be run in the background.
    ///
    /// The future is not cancelled on interrupt and nothing waits for it to complete.
    pub fn spawn(&self, fut: impl Future<Output = ()> + Send + 'static) {
        self.runtime.spawn(fut);
    }

    /// The runtime behind this executor, for work that must finish even after an interrupt, such
    /// as waiting for a stopped process to exit.
    pub fn handle(&self) -> &tokio::runtime::Handle {
        self.runtime.handle()
    }

    pub fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt_handle
    }
}

fn start_interrupt_listener(runtime: &tokio::runtime::Runtime) -> InterruptHandle {
    let handle = InterruptHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                listener_handle.interrupt();
                println!("Received interrupt, finishing the current scenario before stopping...");
            }
            Err(e) => log::warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });

    handle
}
