use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning knobs for one replicated log instance. Unset fields fall back to
/// defaults at spawn time.
#[derive(Clone, Default)]
pub struct ReplicationOptions {
    /// How often a leader pings followers that have nothing new to receive.
    pub heartbeat_interval: Option<Duration>,
    /// Per-RPC deadline for AppendEntries calls.
    pub rpc_timeout: Option<Duration>,
    /// Upper bound on entries shipped in one request.
    pub max_entries_per_request: Option<usize>,
    /// Conflict-rewind rounds tolerated per follower before falling back to
    /// snapshot bootstrap. Tune to the log divergence expected after a
    /// leader change in the target deployment.
    pub max_backtrack_rounds: Option<u32>,
    /// Require entries to be durably synced before they count toward the
    /// commit quorum.
    pub wait_for_sync: Option<bool>,
    /// Event queue capacity of the replica event loop.
    pub event_queue_size: Option<usize>,
}

#[derive(Clone)]
pub(crate) struct ReplicationOptionsValidated {
    pub(crate) heartbeat_interval: Duration,
    pub(crate) rpc_timeout: Duration,
    pub(crate) max_entries_per_request: usize,
    pub(crate) max_backtrack_rounds: u32,
    pub(crate) wait_for_sync: bool,
    pub(crate) event_queue_size: usize,
}

impl ReplicationOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.heartbeat_interval.is_zero() {
            return Err("Heartbeat interval must be non-zero");
        }
        if self.rpc_timeout < self.heartbeat_interval {
            return Err("RPC timeout must not be shorter than the heartbeat interval");
        }
        if self.max_entries_per_request == 0 {
            return Err("At least one entry per request is required");
        }
        if self.event_queue_size == 0 {
            return Err("Event queue must have capacity");
        }
        Ok(())
    }
}

impl TryFrom<ReplicationOptions> for ReplicationOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ReplicationOptions) -> Result<Self, Self::Error> {
        let values = ReplicationOptionsValidated {
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_millis(100)),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_millis(300)),
            max_entries_per_request: options.max_entries_per_request.unwrap_or(1024),
            max_backtrack_rounds: options.max_backtrack_rounds.unwrap_or(8),
            wait_for_sync: options.wait_for_sync.unwrap_or(true),
            event_queue_size: options.event_queue_size.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ReplicationOptionsValidated::try_from(ReplicationOptions::default()).is_ok());
    }

    #[test]
    fn rejects_rpc_timeout_below_heartbeat() {
        let options = ReplicationOptions {
            heartbeat_interval: Some(Duration::from_millis(500)),
            rpc_timeout: Some(Duration::from_millis(100)),
            ..ReplicationOptions::default()
        };
        assert!(ReplicationOptionsValidated::try_from(options).is_err());
    }
}
