use std::time::Duration;

use tokio::sync::watch;

use logway_api::Offset;

/// Next-offset notifier of a single topic.
///
/// The watched value is the offset the next append will receive, so an entry
/// at `offset` exists once the tip is greater than `offset`.
pub(crate) struct Tip {
    tx: watch::Sender<Offset>,
}

impl Tip {
    pub(crate) fn new(next: Offset) -> Self {
        let (tx, _) = watch::channel(next);
        Self { tx }
    }

    /// Publish a new tip. The value never moves backwards.
    pub(crate) fn advance(&self, next: Offset) {
        self.tx.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Offset> {
        self.tx.subscribe()
    }

    /// Live waiters on this topic.
    pub(crate) fn waiters(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Wait until the entry at `offset` exists or `max_wait` elapses.
///
/// The receiver must be taken before the caller checks storage: any append
/// after that point marks the receiver changed and wakes us.
pub(crate) async fn wait_for_tip(
    rx: &mut watch::Receiver<Offset>,
    offset: Offset,
    max_wait: Duration,
) -> bool {
    if *rx.borrow_and_update() > offset {
        return true;
    }
    if max_wait.is_zero() {
        return false;
    }

    // Err = sender dropped, the topic is gone; treat as "nothing yet".
    let reached = rx.wait_for(|next| *next > offset);
    matches!(tokio::time::timeout(max_wait, reached).await, Ok(Ok(_)))
}
