use crate::logstore::LogTerm;
use crate::replica::actor::ActorClient;
use crate::replica::api::ReplicationTick;
use tokio::time;
use tokio::time::Duration;

/// Handle to the leader's replication timer task. Dropping the handle stops
/// the task; ticks carry the term they were armed for, so a tick that
/// outlives the leadership it belongs to is discarded by the event loop.
pub(crate) struct LeaderTimerHandle {
    term: LogTerm,
    _stopper: stop_signal::Stopper,
}

impl LeaderTimerHandle {
    pub(crate) fn spawn_background_task(
        heartbeat_interval: Duration,
        actor_client: ActorClient,
        term: LogTerm,
    ) -> Self {
        let (stopper, stop_check) = stop_signal::new();

        tokio::task::spawn(Self::timer_task(stop_check, heartbeat_interval, actor_client, term));

        LeaderTimerHandle {
            term,
            _stopper: stopper,
        }
    }

    pub(crate) fn term(&self) -> LogTerm {
        self.term
    }

    async fn timer_task(
        stop_check: stop_signal::StopCheck,
        heartbeat_interval: Duration,
        actor_client: ActorClient,
        term: LogTerm,
    ) {
        let tick = ReplicationTick { term };

        // Eagerly publish the first tick so a fresh leader reaches its
        // followers before a full heartbeat interval elapses.
        actor_client.replication_tick(tick).await;

        let mut interval = time::interval(heartbeat_interval);
        loop {
            interval.tick().await;
            if stop_check.should_stop() {
                break;
            }
            actor_client.replication_tick(tick).await;
        }
    }
}

pub(crate) mod stop_signal {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    pub(crate) struct Stopper {
        stop_signal: Arc<AtomicBool>,
    }

    pub(crate) struct StopCheck {
        stop_signal: Arc<AtomicBool>,
    }

    impl Drop for Stopper {
        fn drop(&mut self) {
            self.stop_signal.store(true, Ordering::Release);
        }
    }

    impl StopCheck {
        pub(crate) fn should_stop(&self) -> bool {
            self.stop_signal.load(Ordering::Acquire)
        }
    }

    pub(crate) fn new() -> (Stopper, StopCheck) {
        let stop_signal = Arc::new(AtomicBool::new(false));

        let stopper = Stopper {
            stop_signal: stop_signal.clone(),
        };
        let stop_check = StopCheck { stop_signal };

        (stopper, stop_check)
    }
}
