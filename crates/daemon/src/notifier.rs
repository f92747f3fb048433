//! Peer membership change notifications
//!
//! Best effort: one POST per change, no retry, failures are warnings.
//! A single worker task drains the queue, so changes reach the endpoint in
//! the order they were dispatched, across accounting cycles.

use meshwatch_common::PeerChange;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle for queueing peer changes
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    queue: Option<mpsc::UnboundedSender<PeerChange>>,
}

impl ChangeNotifier {
    /// Start the delivery worker when a URL is configured.
    ///
    /// The worker exits once every handle is dropped and the queue is empty.
    pub fn start(http: reqwest::Client, url: Option<String>) -> (Self, Option<JoinHandle<()>>) {
        let Some(url) = url else {
            return (Self::disabled(), None);
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(deliver(http, url, rx));
        (Self { queue: Some(tx) }, Some(worker))
    }

    pub fn disabled() -> Self {
        Self { queue: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.is_some()
    }

    /// Queue a batch of changes without waiting for delivery
    pub fn dispatch(&self, changes: Vec<PeerChange>) {
        let Some(queue) = &self.queue else {
            return;
        };
        for change in changes {
            if queue.send(change).is_err() {
                warn!("Notifier worker stopped, dropping peer change");
                return;
            }
        }
    }
}

async fn deliver(
    http: reqwest::Client,
    url: String,
    mut rx: mpsc::UnboundedReceiver<PeerChange>,
) {
    while let Some(change) = rx.recv().await {
        notify(&http, &url, &change).await;
    }
    debug!("Notifier worker stopped");
}

/// Send one change and wait for the response
async fn notify(http: &reqwest::Client, url: &str, change: &PeerChange) {
    match http.post(url).json(change).send().await {
        Ok(resp) if resp.status().is_success() => {
            debug!("Notified {} of {} {}", url, change.action, change.public_key);
        }
        Ok(resp) => {
            warn!("Notify server returned non-OK: {}", resp.status());
        }
        Err(e) => {
            warn!("Failed to notify peer change: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use meshwatch_common::PeerChange;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Clone)]
    struct Capture {
        tx: mpsc::UnboundedSender<PeerChange>,
        status: StatusCode,
        first_delay: Duration,
        seen: Arc<AtomicUsize>,
    }

    async fn capture(State(c): State<Capture>, Json(change): Json<PeerChange>) -> StatusCode {
        if c.seen.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(c.first_delay).await;
        }
        let _ = c.tx.send(change);
        c.status
    }

    /// Notify endpoint that records each change as it completes.
    /// The first request is held for `first_delay` before being recorded.
    pub async fn capture_server(
        status: StatusCode,
        first_delay: Duration,
    ) -> (String, mpsc::UnboundedReceiver<PeerChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Capture {
            tx,
            status,
            first_delay,
            seen: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/notify", post(capture))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/notify", addr), rx)
    }
}
