//! Command dispatch with bounded retries.
//!
//! The dispatcher owns retry policy; sessions make one attempt per call.
//! Only connection and timeout errors are retried, with exponential
//! backoff. Broadcasts run every target concurrently and never fail as a
//! whole: each display gets its own [`CommandResult`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::future::join_all;
use tokio::time::Instant;

use crate::config::RetryPolicy;
use crate::endpoint::DisplayId;
use crate::error::CommandError;
use crate::message::{Command, CommandResult};
use crate::registry::FleetRegistry;

type DedupeKey = (String, DisplayId);

/// Expired cache entries are swept once per this many inserts.
const SWEEP_EVERY: u64 = 64;

#[derive(Debug)]
pub struct CommandDispatcher {
    registry: Arc<FleetRegistry>,
    policy: RetryPolicy,
    completed: DashMap<DedupeKey, (Instant, CommandResult)>,
    inserts: AtomicU64,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<FleetRegistry>, policy: RetryPolicy) -> Self {
        Self {
            registry,
            policy,
            completed: DashMap::new(),
            inserts: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `command` against its target display.
    pub async fn execute(&self, command: Command) -> CommandResult {
        let started = Instant::now();
        let key = (command.correlation_id.clone(), command.target.clone());

        if let Some(mut remembered) = self.remembered(&key, started) {
            tracing::debug!(
                display = %command.target,
                correlation_id = %command.correlation_id,
                "repeated command served from cache"
            );
            remembered.latency = started.elapsed();
            remembered.attempts = 0;
            return remembered;
        }

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            // Looked up per attempt so a display removed mid-retry stops
            // being retried.
            let attempt = match self.registry.get_or_create(&command.target) {
                Ok(session) => session.execute(&command.kind).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(reply) => break Ok(reply),
                Err(e) if e.is_retryable() && attempts <= self.policy.max_retries => {
                    let delay = self.policy.delay_for_attempt(attempts - 1);
                    tracing::debug!(
                        display = %command.target,
                        attempt = attempts,
                        ?delay,
                        error = %e,
                        "retrying command"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        display = %command.target,
                        command = command.kind.name(),
                        attempts,
                        error = %e,
                        "command failed"
                    );
                    break Err(CommandError::from(&e));
                }
            }
        };

        let result = CommandResult {
            display_id: command.target,
            correlation_id: command.correlation_id,
            outcome,
            latency: started.elapsed(),
            attempts,
        };
        if result.is_success() {
            self.remember(key, &result);
        }
        result
    }

    /// Run `command` against every display in `targets`, concurrently.
    ///
    /// Duplicate ids collapse into one entry.
    pub async fn broadcast(
        &self,
        command: &Command,
        targets: &[DisplayId],
    ) -> BTreeMap<DisplayId, CommandResult> {
        let unique: BTreeSet<&DisplayId> = targets.iter().collect();
        let runs = unique
            .into_iter()
            .map(|id| self.execute(command.retarget(id)));
        join_all(runs)
            .await
            .into_iter()
            .map(|result| (result.display_id.clone(), result))
            .collect()
    }

    /// Broadcast to every registered display.
    pub async fn broadcast_all(&self, command: &Command) -> BTreeMap<DisplayId, CommandResult> {
        let targets = self.registry.ids();
        self.broadcast(command, &targets).await
    }

    fn remembered(&self, key: &DedupeKey, now: Instant) -> Option<CommandResult> {
        let ttl = self.policy.dedupe_ttl();
        let entry = self.completed.get(key)?;
        let (stored_at, result) = entry.value();
        if now.duration_since(*stored_at) <= ttl {
            return Some(result.clone());
        }
        drop(entry);
        self.completed.remove(key);
        None
    }

    fn remember(&self, key: DedupeKey, result: &CommandResult) {
        let ttl = self.policy.dedupe_ttl();
        if ttl.is_zero() {
            return;
        }
        let now = Instant::now();
        self.completed.insert(key, (now, result.clone()));
        // Lookups already ignore stale entries; this only bounds memory.
        if (self.inserts.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.completed
                .retain(|_, (stored_at, _)| now.duration_since(*stored_at) <= ttl);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::codec::{HttpResponse, WireRequest, WireResponse};
    use crate::config::EngineConfig;
    use crate::endpoint::{DisplayEndpoint, ProtocolKind};
    use crate::error::{ErrorKind, WallError};
    use crate::message::CommandKind;
    use crate::network::{Transport, TransportFactory};
    use crate::status::StatusAggregator;

    /// Fails the first `fail_first` exchanges with a link error.
    struct Flaky {
        fail_first: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Transport for Flaky {
        async fn open(&mut self) -> Result<(), WallError> {
            Ok(())
        }
        async fn exchange(&mut self, _: &WireRequest) -> Result<WireResponse, WallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(WallError::Link("flaky".into()));
            }
            Ok(WireResponse::Http(HttpResponse {
                status: 200,
                body: Bytes::new(),
            }))
        }
        async fn close(&mut self) {}
        fn is_open(&self) -> bool {
            true
        }
    }

    struct FlakyFactory {
        fail_first: u32,
        calls: Arc<AtomicU32>,
    }

    impl TransportFactory for FlakyFactory {
        fn build(&self, _: &DisplayEndpoint) -> Result<Box<dyn Transport>, WallError> {
            Ok(Box::new(Flaky {
                fail_first: self.fail_first,
                calls: self.calls.clone(),
            }))
        }
    }

    async fn dispatcher(fail_first: u32, calls: Arc<AtomicU32>) -> CommandDispatcher {
        let registry = FleetRegistry::with_factory(
            &EngineConfig::default(),
            Arc::new(FlakyFactory { fail_first, calls }),
            StatusAggregator::new(),
        );
        for id in ["a", "b"] {
            registry
                .register(DisplayEndpoint::new(id, id, ProtocolKind::Http, format!("http://{id}")))
                .await
                .unwrap();
        }
        CommandDispatcher::new(Arc::new(registry), RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(2, calls.clone()).await;
        let result = d.execute(Command::new("a", CommandKind::Volume(5))).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 250 ms + 500 ms of backoff.
        assert!(result.latency >= Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(10, calls.clone()).await;
        let result = d.execute(Command::new("a", CommandKind::Volume(5))).await;
        assert_eq!(result.error().unwrap().kind, ErrorKind::Connection);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn invalid_command_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(0, calls.clone()).await;
        let result = d.execute(Command::new("a", CommandKind::Volume(200))).await;
        assert_eq!(result.error().unwrap().kind, ErrorKind::InvalidCommand);
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_display_is_permanent() {
        let d = dispatcher(0, Arc::new(AtomicU32::new(0))).await;
        let result = d.execute(Command::new("nope", CommandKind::Status)).await;
        assert_eq!(result.error().unwrap().kind, ErrorKind::UnknownDisplay);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn repeated_correlation_id_is_served_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(0, calls.clone()).await;
        let cmd = Command::new("a", CommandKind::Volume(7)).with_correlation_id("req-1");

        let first = d.execute(cmd.clone()).await;
        let second = d.execute(cmd).await;
        assert!(first.is_success());
        assert_eq!(second.outcome, first.outcome);
        assert_eq!(second.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_results_are_swept_and_not_served() {
        let calls = Arc::new(AtomicU32::new(0));
        let d = dispatcher(0, calls.clone()).await;
        let old = Command::new("a", CommandKind::Volume(7)).with_correlation_id("old");
        assert!(d.execute(old.clone()).await.is_success());
        assert_eq!(d.completed.len(), 1);

        tokio::time::advance(d.policy().dedupe_ttl() + Duration::from_secs(1)).await;
        for n in 1..SWEEP_EVERY {
            let cmd = Command::new("b", CommandKind::Volume(1)).with_correlation_id(format!("req-{n}"));
            assert!(d.execute(cmd).await.is_success());
        }
        // The last insert triggered a sweep that dropped "old".
        assert_eq!(d.completed.len() as u64, SWEEP_EVERY - 1);

        let again = d.execute(old).await;
        assert_eq!(again.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), SWEEP_EVERY as u32 + 1);
    }

    #[tokio::test]
    async fn broadcast_collapses_duplicates() {
        let d = dispatcher(0, Arc::new(AtomicU32::new(0))).await;
        let cmd = Command::new("a", CommandKind::Volume(1));
        let targets = [
            DisplayId::from("a"),
            DisplayId::from("b"),
            DisplayId::from("a"),
            DisplayId::from("zz"),
        ];
        let results = d.broadcast(&cmd, &targets).await;
        assert_eq!(results.len(), 3);
        assert!(results[&DisplayId::from("a")].is_success());
        assert!(results[&DisplayId::from("b")].is_success());
        assert!(!results[&DisplayId::from("zz")].is_success());
    }
}
