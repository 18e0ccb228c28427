//! Runtime trait for abstracting away OS-esque features and allowing
//! different implementations for test, dev, and prod.

use std::{
    future::Future,
    pin::Pin,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use futures::future::{
    BoxFuture,
    FusedFuture,
};
use rand::RngCore;
use thiserror::Error;
use uuid::Uuid;

use crate::types::LogTimestamp;

#[derive(Error, Debug)]
pub enum JoinError {
    #[error("Future canceled")]
    Canceled,
    #[error("Future panicked: {0:?}")]
    Panicked(anyhow::Error),
}

impl From<tokio::task::JoinError> for JoinError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            JoinError::Canceled
        } else {
            JoinError::Panicked(anyhow::anyhow!("{:?}", e.into_panic()))
        }
    }
}

pub trait SpawnHandle: Send + Sync {
    fn shutdown(&mut self);
    fn join(&mut self) -> BoxFuture<'_, Result<(), JoinError>>;
}

/// Shutdown the associated future, preempting it at its next yield point,
/// and join on its result.
pub async fn shutdown_and_join(mut handle: Box<dyn SpawnHandle>) -> anyhow::Result<()> {
    handle.shutdown();
    if let Err(e) = handle.join().await {
        if !matches!(e, JoinError::Canceled) {
            return Err(e.into());
        }
    }
    Ok(())
}

/// A Runtime can be considered somewhat like an operating system abstraction
/// for our codebase. Functionality like time, randomness, and task spawning
/// should operate quite differently between test and prod, e.g., we don't
/// want `wait` to actually sleep wall-clock time in tests. Application code
/// is parameterized by a runtime implementation.
pub trait Runtime: Clone + Sync + Send + 'static {
    /// Sleep for the given duration.
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>>;

    /// Spawn a future on the runtime's executor.
    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle>;

    /// Return (a potentially-virtualized) system time. Compare with
    /// `std::time::UNIX_EPOCH` to obtain a Unix timestamp.
    fn system_time(&self) -> SystemTime;

    /// Return (a potentially-virtualized) reading from a monotonic clock.
    fn monotonic_now(&self) -> tokio::time::Instant;

    /// Use the runtime's source of randomness.
    fn rng(&self) -> Box<dyn RngCore>;

    fn unix_timestamp(&self) -> UnixTimestamp {
        UnixTimestamp(
            self.system_time()
                .duration_since(UNIX_EPOCH)
                .expect("Failed to compute unix timestamp"),
        )
    }

    fn new_uuid_v4(&self) -> Uuid {
        let mut rng = self.rng();
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    /// The µs-truncated wall clock used to stamp accepted log events.
    fn generate_log_timestamp(&self) -> anyhow::Result<LogTimestamp> {
        LogTimestamp::from_system_time(self.system_time())
    }
}

/// Abstraction over a unix timestamp. Internally it stores a Duration since
/// the unix epoch.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnixTimestamp(Duration);

impl UnixTimestamp {
    pub fn from_secs_f64(secs: f64) -> Self {
        UnixTimestamp(Duration::from_secs_f64(secs))
    }

    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.as_secs_f64()
    }

    pub fn as_system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.0
    }
}
