//! Background pump that moves items from a live subscription into a state
//! container until it is told to stop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use parley_shared::transport::{StreamHandle, Subscription};

/// A running live feed. Dropping it stops delivery; [`LiveFeed::close`]
/// additionally ends the subscription on the transport side and waits for
/// the pump to exit.
pub struct LiveFeed {
    label: &'static str,
    handle: Arc<dyn StreamHandle>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LiveFeed {
    /// Start pumping `subscription` into `on_item`.
    ///
    /// Item errors are logged and skipped. The pump exits when the stream
    /// ends or when the feed is closed or dropped; once stopped, no further
    /// item reaches `on_item`.
    pub fn spawn<T, F>(label: &'static str, subscription: Subscription<T>, mut on_item: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let handle = subscription.handle();
        let (stop, mut stopped) = oneshot::channel::<()>();
        let mut items = subscription;

        let task = tokio::spawn(async move {
            debug!(feed = label, "Live feed started");
            loop {
                tokio::select! {
                    biased;

                    _ = &mut stopped => {
                        debug!(feed = label, "Live feed stopped");
                        break;
                    }

                    next = items.next() => match next {
                        Some(Ok(item)) => on_item(item),
                        Some(Err(e)) => {
                            warn!(feed = label, error = %e, "Live feed delivered an error");
                        }
                        None => {
                            debug!(feed = label, "Live feed ended by transport");
                            break;
                        }
                    },
                }
            }
        });

        Self {
            label,
            handle,
            stop,
            task,
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Stop delivery, end the transport subscription and wait for the pump.
    /// Errors while ending are logged, never raised.
    pub async fn close(self) {
        let LiveFeed {
            label,
            handle,
            stop,
            task,
        } = self;

        let _ = stop.send(());
        if let Err(e) = handle.end().await {
            warn!(feed = label, error = %e, "Failed to end live feed");
        }
        if let Err(e) = task.await {
            warn!(feed = label, error = %e, "Live feed task failed");
        }
        debug!(feed = label, "Live feed closed");
    }
}
