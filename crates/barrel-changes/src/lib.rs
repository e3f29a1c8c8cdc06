//! Change notification fan-out and the feed adapters built on it.
//!
//! The [`EventBus`] is a per-database broadcast channel carrying
//! `db_updated` events. Feeds never ship data over the bus: a notification
//! only says "something committed", and consumers call back into
//! [`ChangesSource::changes_since`] for the actual delta.
//!
//! Three feed modes:
//! - normal: one synchronous fetch
//! - longpoll: return immediately if there is anything, else block for the
//!   first update
//! - eventsource: a stream of SSE frames with heartbeat keep-alives

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use barrel_core::document::ChangesResponse;
use barrel_core::error::Result;

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

/// A notification published on a database's bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbEvent {
    /// A write committed at `seq`.
    Updated { seq: u64 },
}

/// Per-database multi-subscriber notification channel.
///
/// Delivery is best-effort: notifying with no subscribers is fine, and slow
/// subscribers may observe a gap (they re-fetch from their last seen seq, so
/// nothing is lost).
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DbEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn notify(&self, event: DbEvent) {
        // Ignore send errors (no receivers).
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A registration on an [`EventBus`]. Dropping it unregisters.
pub struct Subscription {
    rx: broadcast::Receiver<DbEvent>,
}

impl Subscription {
    /// Next event, or `None` once the bus is gone. Lag is skipped: the
    /// consumer re-fetches the delta anyway.
    pub async fn recv(&mut self) -> Option<DbEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Changes source
// ---------------------------------------------------------------------------

/// What a feed needs from a database: the resumable by-seq scan and a bus
/// registration.
#[async_trait]
pub trait ChangesSource: Send + Sync + 'static {
    /// Changes committed after `since`, ascending, at most `max` rows.
    async fn changes_since(&self, since: u64, max: Option<u64>) -> Result<ChangesResponse>;

    /// Register with the database's event bus.
    fn subscribe(&self) -> Subscription;
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

/// Configuration for a feed.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub since: u64,
    /// Keep-alive cadence for the event-stream feed.
    pub heartbeat: Duration,
    pub max: Option<u64>,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            since: 0,
            heartbeat: Duration::from_millis(60_000),
            max: None,
        }
    }
}

/// One-shot fetch.
pub async fn normal_feed(source: &dyn ChangesSource, since: u64) -> Result<ChangesResponse> {
    source.changes_since(since, None).await
}

/// Return immediately when there is anything past `since`; otherwise block
/// until the first update lands and return that batch.
///
/// The subscription is taken before the first fetch, so a commit landing
/// between the fetch and the wait still wakes the caller.
pub async fn longpoll_feed(source: &dyn ChangesSource, since: u64) -> Result<ChangesResponse> {
    let mut sub = source.subscribe();

    let resp = source.changes_since(since, None).await?;
    if !resp.results.is_empty() {
        return Ok(resp);
    }

    loop {
        match sub.recv().await {
            Some(DbEvent::Updated { .. }) => {
                let resp = source.changes_since(since, None).await?;
                if !resp.results.is_empty() {
                    return Ok(resp);
                }
            }
            // Bus gone (database closed): return the empty response.
            None => return Ok(resp),
        }
    }
}

/// Handle for a running event-stream feed. Dropping or cancelling stops the
/// feed task and releases its bus registration.
pub struct FeedHandle {
    cancel: CancellationToken,
}

impl FeedHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start an event-stream feed.
///
/// Each yielded frame is either an SSE event
/// (`id: <hex>\ndata: <feed JSON>\n\n`) or a bare `"\n"` heartbeat emitted
/// every `heartbeat` interval to keep idle connections open. Event ids are
/// timestamp-derived and strictly increasing.
pub fn event_source_feed(
    source: Arc<dyn ChangesSource>,
    opts: FeedOptions,
) -> (ReceiverStream<String>, FeedHandle) {
    let (tx, rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let cancel_task = cancel.clone();

    tokio::spawn(async move {
        let mut sub = source.subscribe();
        let mut since = opts.since;
        let mut last_id = 0u64;
        let mut heartbeat =
            tokio::time::interval_at(tokio::time::Instant::now() + opts.heartbeat, opts.heartbeat);

        // Catch-up batch before tailing the bus.
        match source.changes_since(since, opts.max).await {
            Ok(resp) if !resp.results.is_empty() => {
                since = resp.last_seq;
                if !send_event(&tx, &mut last_id, &resp).await {
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(%err, "event stream: initial fetch failed");
                return;
            }
        }

        loop {
            tokio::select! {
                _ = cancel_task.cancelled() => break,
                _ = heartbeat.tick() => {
                    if tx.send("\n".to_string()).await.is_err() {
                        break;
                    }
                }
                event = sub.recv() => match event {
                    Some(DbEvent::Updated { .. }) => {
                        match source.changes_since(since, opts.max).await {
                            Ok(resp) if !resp.results.is_empty() => {
                                since = resp.last_seq;
                                if !send_event(&tx, &mut last_id, &resp).await {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(err) => {
                                tracing::debug!(%err, "event stream: fetch failed");
                                break;
                            }
                        }
                    }
                    None => break,
                },
            }
        }
    });

    (ReceiverStream::new(rx), FeedHandle { cancel })
}

async fn send_event(
    tx: &mpsc::Sender<String>,
    last_id: &mut u64,
    resp: &ChangesResponse,
) -> bool {
    let payload = match serde_json::to_string(resp) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::debug!(%err, "event stream: encode failed");
            return false;
        }
    };
    let id = next_event_id(last_id);
    tx.send(format!("id: {:x}\ndata: {}\n\n", id, payload))
        .await
        .is_ok()
}

/// Millisecond timestamp forced strictly monotone, so bursts within one
/// millisecond still get increasing ids.
fn next_event_id(last: &mut u64) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let id = now.max(*last + 1);
    *last = id;
    id
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
