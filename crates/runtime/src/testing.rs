//! Deterministic runtime for tests: seeded randomness and a virtual wall
//! clock the test advances explicitly. Timers run on tokio's (paused) test
//! clock, so tests use `#[tokio::test(start_paused = true)]` and let
//! auto-advance drive `wait`.

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use common::runtime::{
    Runtime,
    SpawnHandle,
};
use futures::{
    future::FusedFuture,
    FutureExt,
};
use parking_lot::Mutex;
use rand::{
    RngCore,
    SeedableRng,
};
use rand_chacha::ChaCha12Rng;

use crate::prod::FutureHandle;

/// Tests start at a fixed, round instant so timestamp assertions are
/// readable: 2024-01-01T00:00:00Z.
const TEST_EPOCH_SECS: u64 = 1_704_067_200;

struct TestRuntimeState {
    rng: ChaCha12Rng,
    system_time: SystemTime,
}

#[derive(Clone)]
pub struct TestRuntime {
    state: Arc<Mutex<TestRuntimeState>>,
}

impl TestRuntime {
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(TestRuntimeState {
                rng: ChaCha12Rng::seed_from_u64(seed),
                system_time: UNIX_EPOCH + Duration::from_secs(TEST_EPOCH_SECS),
            })),
        }
    }

    /// Move the virtual wall clock forward. Does not affect tokio's timer
    /// clock; pair with `tokio::time::advance` when a sleeping task should
    /// also observe the jump.
    pub fn advance_system_time(&self, duration: Duration) {
        self.state.lock().system_time += duration;
    }

    pub fn set_system_time(&self, time: SystemTime) {
        self.state.lock().system_time = time;
    }
}

impl Runtime for TestRuntime {
    fn wait(&self, duration: Duration) -> Pin<Box<dyn FusedFuture<Output = ()> + Send + 'static>> {
        Box::pin(tokio::time::sleep(duration).fuse())
    }

    fn spawn(
        &self,
        name: &'static str,
        f: impl Future<Output = ()> + Send + 'static,
    ) -> Box<dyn SpawnHandle> {
        tracing::debug!("Spawning {name}");
        Box::new(FutureHandle::new(tokio::spawn(f)))
    }

    fn system_time(&self) -> SystemTime {
        self.state.lock().system_time
    }

    fn monotonic_now(&self) -> tokio::time::Instant {
        tokio::time::Instant::now()
    }

    fn rng(&self) -> Box<dyn RngCore> {
        // Fork a child generator so callers can hold onto it without
        // serializing on the runtime lock.
        let seed = self.state.lock().rng.next_u64();
        Box::new(ChaCha12Rng::seed_from_u64(seed))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::runtime::Runtime;

    use super::TestRuntime;

    #[tokio::test(start_paused = true)]
    async fn test_runtime_is_deterministic() {
        let rt1 = TestRuntime::with_seed(7);
        let rt2 = TestRuntime::with_seed(7);
        assert_eq!(rt1.new_uuid_v4(), rt2.new_uuid_v4());
        assert_eq!(rt1.system_time(), rt2.system_time());

        rt1.advance_system_time(Duration::from_secs(90));
        assert_eq!(
            rt1.system_time()
                .duration_since(rt2.system_time())
                .unwrap(),
            Duration::from_secs(90)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_auto_advances() {
        let rt = TestRuntime::new();
        // Paused tokio time auto-advances, so this returns immediately.
        rt.wait(Duration::from_secs(3600)).await;
    }
}
