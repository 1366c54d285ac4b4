//! Connection state and the reconnect loop of one subscription.
//!
//! [`run_connection`] opens the transport, reads events until the
//! connection fails, then waits `min(base * 2^n, cap)` and tries again,
//! forever, until its cancellation token fires. Failures never escape the
//! loop; they are published as [`ConnectionState`].

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    ConnectionShared, EventStream, EventTransport, HEARTBEAT_EVENT, PRICE_UPDATE_EVENT,
    ServerEvent, SubscriptionKey,
};
use crate::buffer::TickSink;
use crate::models::now_unix_ms;
use crate::models::tick::PriceTick;
use crate::retry::RetryPolicy;

/// Observable state of one subscription's connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    /// Last transport or parse error. Cleared when a connection opens.
    pub connection_error: Option<String>,
    /// Reconnect attempts since the subscription was created. Never reset
    /// by a successful reconnect.
    pub reconnect_count: u32,
    /// Unix ms of the last `heartbeat` event.
    pub last_heartbeat_at: Option<i64>,
    /// Unix ms at which the current connection opened.
    pub connected_at: Option<i64>,
    /// Most recent parsed tick.
    pub last_update: Option<PriceTick>,
    /// Local Unix ms at which `last_update` was received.
    pub last_update_at: Option<i64>,
    /// A reconnect delay is currently running.
    pub reconnect_pending: bool,
}

impl ConnectionState {
    /// Returns `true` if the connection claims to be up but the server has
    /// been silent for longer than `threshold`.
    pub fn is_stale(&self, now_ms: i64, threshold: Duration) -> bool {
        if !self.is_connected {
            return false;
        }
        let last_sign_of_life = self
            .last_heartbeat_at
            .into_iter()
            .chain(self.connected_at)
            .chain(self.last_update_at)
            .max();
        let threshold_ms = i64::try_from(threshold.as_millis()).unwrap_or(i64::MAX);
        match last_sign_of_life {
            Some(at) => now_ms.saturating_sub(at) > threshold_ms,
            None => false,
        }
    }
}

/// Why the reader loop exited.
enum DisconnectReason {
    /// The connection was lost, refused, or ended by the server.
    Failed(String),
    /// The subscription is being torn down.
    Cancelled,
}

/// Runs one subscription's connection until `cancel` fires.
pub(crate) async fn run_connection<T: EventTransport>(
    transport: Arc<T>,
    key: SubscriptionKey,
    policy: RetryPolicy,
    shared: Arc<ConnectionShared>,
    sink: TickSink,
    cancel: CancellationToken,
) {
    loop {
        debug!(key = %key, "Opening price stream");
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            opened = transport.open(&key) => opened,
        };

        let reason = match opened {
            Ok(events) => {
                shared.update(&cancel, |state| {
                    state.is_connected = true;
                    state.connection_error = None;
                    state.connected_at = Some(now_unix_ms());
                });
                info!(key = %key, "Price stream connected");
                read_loop(events, &shared, &sink, &cancel).await
            }
            Err(e) => DisconnectReason::Failed(format!("connect failed: {e}")),
        };

        let error = match reason {
            DisconnectReason::Cancelled => break,
            DisconnectReason::Failed(_) if cancel.is_cancelled() => break,
            DisconnectReason::Failed(error) => error,
        };

        let attempt = shared.current().reconnect_count;
        let delay = policy.delay_for(attempt);
        warn!(
            key = %key,
            error = %error,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            "Price stream disconnected, backing off"
        );
        shared.update(&cancel, |state| {
            state.is_connected = false;
            state.connected_at = None;
            state.connection_error = Some(error);
            state.reconnect_pending = true;
        });

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        shared.update(&cancel, |state| {
            state.reconnect_pending = false;
            state.reconnect_count = state.reconnect_count.saturating_add(1);
        });
    }

    debug!(key = %key, "Price stream task stopped");
}

/// Reads events until the connection drops or teardown begins.
async fn read_loop(
    mut events: EventStream,
    shared: &ConnectionShared,
    sink: &TickSink,
    cancel: &CancellationToken,
) -> DisconnectReason {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return DisconnectReason::Cancelled,
            next = events.next() => next,
        };

        match next {
            Some(Ok(event)) => handle_event(event, shared, sink, cancel),
            Some(Err(e)) => return DisconnectReason::Failed(e.to_string()),
            None => return DisconnectReason::Failed("stream closed by server".to_string()),
        }
    }
}

fn handle_event(
    event: ServerEvent,
    shared: &ConnectionShared,
    sink: &TickSink,
    cancel: &CancellationToken,
) {
    match event.event.as_str() {
        PRICE_UPDATE_EVENT => match PriceTick::parse(&event.data) {
            Ok(tick) => {
                if cancel.is_cancelled() {
                    return;
                }
                if !sink.send(tick.clone()) {
                    warn!(item_id = tick.item_id, "Tick buffer writer is gone, tick not buffered");
                }
                shared.update(cancel, |state| {
                    state.last_update = Some(tick.clone());
                    state.last_update_at = Some(now_unix_ms());
                });
                shared.notify(&tick);
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse price update");
                shared.update(cancel, |state| {
                    state.connection_error = Some(format!("failed to parse price update: {e}"));
                });
            }
        },
        HEARTBEAT_EVENT => {
            shared.update(cancel, |state| state.last_heartbeat_at = Some(now_unix_ms()));
        }
        other => debug!(event = other, "Ignoring unknown stream event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(at: i64) -> ConnectionState {
        ConnectionState {
            is_connected: true,
            connected_at: Some(at),
            ..Default::default()
        }
    }

    #[test]
    fn fresh_connection_is_not_stale() {
        assert!(!connected(1_000).is_stale(5_000, Duration::from_secs(10)));
    }

    #[test]
    fn silence_past_threshold_is_stale() {
        let mut state = connected(1_000);
        assert!(state.is_stale(20_000, Duration::from_secs(10)));

        state.last_heartbeat_at = Some(15_000);
        assert!(!state.is_stale(20_000, Duration::from_secs(10)));
    }

    #[test]
    fn huge_threshold_is_never_stale() {
        let state = connected(1_000);
        assert!(!state.is_stale(i64::MAX, Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn staleness_uses_local_receipt_time() {
        let mut state = connected(1_000);
        // A tick stamped by a server clock far ahead does not keep the
        // connection fresh; only its local receipt time counts.
        state.last_update = Some(PriceTick {
            item_id: 1,
            high: None,
            low: None,
            high_time: None,
            low_time: None,
            timestamp: 1_000_000,
        });
        assert!(state.is_stale(20_000, Duration::from_secs(10)));

        state.last_update_at = Some(18_000);
        assert!(!state.is_stale(20_000, Duration::from_secs(10)));
    }

    #[test]
    fn disconnected_is_never_stale() {
        let state = ConnectionState::default();
        assert!(!state.is_stale(i64::MAX, Duration::ZERO));
    }
}
