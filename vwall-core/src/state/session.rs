use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::codec::ProtocolCodec;
use crate::endpoint::{DisplayEndpoint, DisplayId};
use crate::error::WallError;
use crate::message::{CommandKind, DisplayValues, Reply};
use crate::network::Transport;
use crate::state::LinkState;
use crate::status::{StatusAggregator, StatusEvent};

/// Live connection to one display.
///
/// Owns the transport and the link state machine. At most one command is in
/// flight per session; callers queue on the inner mutex. A session makes a
/// single attempt per command; retrying is the dispatcher's business.
pub struct DisplaySession {
    endpoint: DisplayEndpoint,
    failure_threshold: u32,
    status: StatusAggregator,
    retired: AtomicBool,
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    state: LinkState,
    failures: u32,
    transport: Box<dyn Transport>,
    codec: ProtocolCodec,
    values: DisplayValues,
    last_seen: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for DisplaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplaySession")
            .field("id", &self.endpoint.id)
            .field("protocol", &self.endpoint.protocol)
            .field("retired", &self.retired.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl DisplaySession {
    pub fn new(
        endpoint: DisplayEndpoint,
        transport: Box<dyn Transport>,
        codec: ProtocolCodec,
        failure_threshold: u32,
        status: StatusAggregator,
    ) -> Self {
        Self {
            endpoint,
            failure_threshold: failure_threshold.max(1),
            status,
            retired: AtomicBool::new(false),
            inner: Mutex::new(SessionInner {
                state: LinkState::Disconnected,
                failures: 0,
                transport,
                codec,
                values: DisplayValues::default(),
                last_seen: None,
            }),
        }
    }

    pub fn id(&self) -> &DisplayId {
        &self.endpoint.id
    }

    pub fn endpoint(&self) -> &DisplayEndpoint {
        &self.endpoint
    }

    pub async fn link_state(&self) -> LinkState {
        self.inner.lock().await.state
    }

    pub async fn failures(&self) -> u32 {
        self.inner.lock().await.failures
    }

    pub async fn values(&self) -> DisplayValues {
        self.inner.lock().await.values.clone()
    }

    pub async fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.last_seen
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Run one command: reconnect if needed, one exchange, update state.
    pub async fn execute(&self, kind: &CommandKind) -> Result<Reply, WallError> {
        kind.validate()?;
        self.ensure_active()?;

        let mut guard = self.inner.lock().await;
        // Removed while we were queued.
        self.ensure_active()?;
        let inner = &mut *guard;

        let request = inner.codec.encode(kind)?;

        if !inner.state.is_usable() {
            self.reconnect(inner).await?;
        }

        tracing::debug!(display = %self.endpoint.id, command = kind.name(), "exchange");
        let outcome = match inner.transport.exchange(&request).await {
            Ok(response) => inner.codec.decode(kind, &response),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(reply) => {
                self.record_success(inner, &reply)?;
                Ok(reply)
            }
            Err(e) if e.is_link_failure() => {
                self.record_failure(inner, &e).await?;
                Err(e)
            }
            Err(e) => {
                // A bad or refused reply still proves the link works.
                tracing::warn!(display = %self.endpoint.id, error = %e, "display rejected command");
                Err(e)
            }
        }
    }

    /// Explicit teardown. A no-op unless the link is up.
    pub async fn teardown(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let previous = inner.state;
        if inner.state.teardown().is_ok() {
            inner.transport.close().await;
            tracing::info!(display = %self.endpoint.id, "session torn down");
            self.publish_link(previous, inner);
        }
    }

    /// Tear down and refuse every later command.
    pub async fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        self.teardown().await;
    }

    fn ensure_active(&self) -> Result<(), WallError> {
        if self.is_retired() {
            return Err(WallError::Link(format!(
                "display {} was removed",
                self.endpoint.id
            )));
        }
        Ok(())
    }

    async fn reconnect(&self, inner: &mut SessionInner) -> Result<(), WallError> {
        let previous = inner.state;
        if previous == LinkState::Connecting {
            // The caller of an earlier attempt dropped it mid-open.
            tracing::debug!(display = %self.endpoint.id, "abandoned connect attempt discarded");
            inner.transport.close().await;
        }
        inner.state.begin_connect()?;
        if previous != inner.state {
            self.publish_link(previous, inner);
        }

        match inner.transport.open().await {
            Ok(()) => {
                inner.state.connect_succeeded()?;
                tracing::info!(display = %self.endpoint.id, address = %self.endpoint.address, "link established");
                self.publish_link(LinkState::Connecting, inner);
                Ok(())
            }
            Err(e) => {
                inner.failures = inner.failures.saturating_add(1);
                inner.state.connect_failed()?;
                inner.transport.close().await;
                tracing::warn!(display = %self.endpoint.id, error = %e, "reconnect failed");
                self.publish_link(LinkState::Connecting, inner);
                Err(e)
            }
        }
    }

    fn record_success(&self, inner: &mut SessionInner, reply: &Reply) -> Result<(), WallError> {
        let previous = inner.state;
        let previous_failures = inner.failures;
        inner.state.record_success();
        inner.failures = 0;
        if previous != inner.state || previous_failures != 0 {
            if previous != inner.state {
                tracing::info!(display = %self.endpoint.id, from = %previous, "link recovered");
            }
            self.publish_link(previous, inner);
        }

        inner.values.apply(reply);
        let now = Utc::now();
        inner.last_seen = Some(now);
        self.status.publish(StatusEvent::Contact {
            display: self.endpoint.id.clone(),
            values: inner.values.clone(),
            at: now,
        });
        Ok(())
    }

    async fn record_failure(&self, inner: &mut SessionInner, error: &WallError) -> Result<(), WallError> {
        let previous = inner.state;
        inner.failures = inner.failures.saturating_add(1);
        inner.state.record_failure(inner.failures, self.failure_threshold)?;

        if inner.state.is_disconnected() {
            inner.transport.close().await;
            tracing::warn!(
                display = %self.endpoint.id,
                failures = inner.failures,
                error = %error,
                "failure threshold reached, link released"
            );
        } else {
            tracing::warn!(
                display = %self.endpoint.id,
                failures = inner.failures,
                error = %error,
                "link degraded"
            );
        }
        self.publish_link(previous, inner);
        Ok(())
    }

    fn publish_link(&self, previous: LinkState, inner: &SessionInner) {
        self.status.publish(StatusEvent::Link {
            display: self.endpoint.id.clone(),
            previous,
            state: inner.state,
            failures: inner.failures,
        });
    }
}
