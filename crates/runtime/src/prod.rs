//! Production implementation of the Runtime trait.

use std::{
    future::Future,
    pin::Pin,
    time::SystemTime,
};

use common::{
    knobs::{
        RUNTIME_STACK_SIZE,
        RUNTIME_WORKER_THREADS,
    },
    runtime::{
        JoinError,
        Runtime,
        SpawnHandle,
    },
};
use futures::{
    future::{
        BoxFuture,
        FusedFuture,
    },
    FutureExt,
    TryFutureExt,
};
use rand::RngCore;
use tokio::{
    runtime::{
        Builder,
        Runtime as TokioRuntime,
    },
    time::{
        sleep,
        Duration,
        Instant,
    },
};

pub struct FutureHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl FutureHandle {
    pub fn new(handle: tokio::task::JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl SpawnHandle for FutureHandle {
    fn shutdown(&mut self) {
        self.handle.abort();
    }

    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>> {
        (&mut self.handle).map_err(JoinError::from).boxed()
    }
}

/// The tokio-backed runtime used by the real binaries.
#[derive(Clone)]
pub struct ProdRuntime {
    handle: tokio::runtime::Handle,
}

impl ProdRuntime {
    /// Build the process's tokio runtime with our standard settings. Call
    /// once from `main`; the returned runtime must outlive all
    /// [`ProdRuntime`] clones handed out by [`ProdRuntime::new`].
    pub fn init_tokio() -> anyhow::Result<TokioRuntime> {
        let mut builder = Builder::new_multi_thread();
        builder
            .enable_all()
            .thread_stack_size(*RUNTIME_STACK_SIZE)
            .thread_name("logbull-runtime");
        if *RUNTIME_WORKER_THREADS > 0 {
            builder.worker_threads(*RUNTIME_WORKER_THREADS);
        }
        Ok(builder.build()?)
    }

    pub fn new(tokio_rt: &TokioRuntime) -> Self {
        Self {
            handle: tokio_rt.handle().clone(),
        }
    }

    pub fn block_on<F: Future>(&self, name: &'static str, f: F) -> F::Output {
        tracing::debug!("Blocking on {name}");
        self.handle.block_on(f)
    }
}

impl Runtime for ProdRuntime {
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(sleep(duration).fuse())
    }

    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        tracing::debug!("Spawning {name}");
        Box::new(FutureHandle::new(self.handle.spawn(f)))
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    fn monotonic_now(&self) -> Instant {
        Instant::now()
    }

    fn rng(&self) -> Box<dyn RngCore> {
        Box::new(rand::rng())
    }
}
