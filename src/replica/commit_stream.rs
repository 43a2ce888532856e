use crate::logstore::TermIndexPair;
use bytes::Bytes;
use tokio::sync::mpsc;

pub(crate) fn create_commit_stream() -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    let publisher = CommitStreamPublisher { sender: tx };
    let stream = CommitStream { receiver: rx };

    (publisher, stream)
}

pub(crate) struct CommitStreamPublisher {
    sender: mpsc::UnboundedSender<CommittedEntry>,
}

impl CommitStreamPublisher {
    pub(crate) fn notify_applied(&self, logger: &slog::Logger, entry: CommittedEntry) {
        if self.sender.send(entry).is_err() {
            slog::debug!(logger, "Commit stream receiver has disconnected.");
        }
    }
}

/// An entry that has been committed by the replication group and applied to
/// the local state machine.
#[derive(Debug)]
pub struct CommittedEntry {
    pub position: TermIndexPair,
    pub payload: Bytes,
}

/// Ordered stream of applied entries, for the application to observe.
/// Entries arrive strictly in index order, each exactly once.
pub struct CommitStream {
    receiver: mpsc::UnboundedReceiver<CommittedEntry>,
}

impl CommitStream {
    /// Next applied entry, or None once the log instance is torn down.
    pub async fn next(&mut self) -> Option<CommittedEntry> {
        self.receiver.recv().await
    }
}
