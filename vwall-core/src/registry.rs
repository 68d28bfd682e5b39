//! Registry of known displays and their live sessions.
//!
//! Endpoints come from configuration; sessions are created lazily on first
//! use (or eagerly via [`FleetRegistry::warm_up`]). Both maps are sharded so
//! looking up one display never blocks commands to another.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::codec::{MdcConfig, ProtocolCodec};
use crate::config::EngineConfig;
use crate::endpoint::{DisplayEndpoint, DisplayId};
use crate::error::WallError;
use crate::network::{DefaultTransportFactory, TransportFactory};
use crate::state::DisplaySession;
use crate::status::StatusAggregator;

/// What a [`FleetRegistry::reload`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub added: Vec<DisplayId>,
    pub changed: Vec<DisplayId>,
    pub removed: Vec<DisplayId>,
}

pub struct FleetRegistry {
    endpoints: DashMap<DisplayId, DisplayEndpoint>,
    sessions: DashMap<DisplayId, Arc<DisplaySession>>,
    factory: Arc<dyn TransportFactory>,
    mdc: MdcConfig,
    failure_threshold: u32,
    status: StatusAggregator,
}

impl std::fmt::Debug for FleetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetRegistry")
            .field("endpoints", &self.endpoints.len())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl FleetRegistry {
    /// Registry using the real TCP, serial and HTTP adapters.
    pub fn new(config: &EngineConfig, status: StatusAggregator) -> Self {
        let factory = Arc::new(DefaultTransportFactory::new(config.transport.clone()));
        Self::with_factory(config, factory, status)
    }

    pub fn with_factory(
        config: &EngineConfig,
        factory: Arc<dyn TransportFactory>,
        status: StatusAggregator,
    ) -> Self {
        Self {
            endpoints: DashMap::new(),
            sessions: DashMap::new(),
            factory,
            mdc: config.mdc.clone(),
            failure_threshold: config.session.failure_threshold,
            status,
        }
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    /// Add a display, or replace one whose descriptor changed.
    ///
    /// Returns `true` if the registry changed.
    pub async fn register(&self, endpoint: DisplayEndpoint) -> Result<bool, WallError> {
        endpoint.validate()?;
        let id = endpoint.id.clone();
        let previous = self.endpoints.insert(id.clone(), endpoint.clone());
        match previous {
            Some(old) if old == endpoint => Ok(false),
            Some(_) => {
                // The live session was built for the old descriptor.
                if let Some((_, session)) = self.sessions.remove(&id) {
                    session.retire().await;
                }
                tracing::info!(display = %id, "display endpoint replaced");
                Ok(true)
            }
            None => {
                self.status.track(&id);
                tracing::info!(display = %id, protocol = %endpoint.protocol, "display registered");
                Ok(true)
            }
        }
    }

    /// Session for `id`, created on first use.
    ///
    /// The transport is built with no map lock held; if another caller
    /// inserts first, its session wins and ours is dropped unused.
    pub fn get_or_create(&self, id: &DisplayId) -> Result<Arc<DisplaySession>, WallError> {
        if let Some(session) = self.session(id) {
            return Ok(session);
        }
        loop {
            let endpoint = self
                .endpoint(id)
                .ok_or_else(|| WallError::UnknownDisplay(id.clone()))?;
            let transport = self.factory.build(&endpoint)?;
            let codec = ProtocolCodec::for_endpoint(&endpoint, &self.mdc);
            let built = Arc::new(DisplaySession::new(
                endpoint.clone(),
                transport,
                codec,
                self.failure_threshold,
                self.status.clone(),
            ));

            // Holding the endpoint entry keeps a concurrent `remove` from
            // orphaning the session we are about to insert.
            let current = self
                .endpoints
                .get(id)
                .ok_or_else(|| WallError::UnknownDisplay(id.clone()))?;
            if *current.value() != endpoint {
                // Re-registered while we were building.
                continue;
            }
            return Ok(match self.sessions.entry(id.clone()) {
                Entry::Occupied(entry) => Arc::clone(entry.get()),
                Entry::Vacant(entry) => {
                    tracing::debug!(display = %id, "session created");
                    entry.insert(Arc::clone(&built));
                    built
                }
            });
        }
    }

    /// Existing session only; never creates one.
    pub fn session(&self, id: &DisplayId) -> Option<Arc<DisplaySession>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Tear down the session and forget the display.
    pub async fn remove(&self, id: &DisplayId) -> Result<DisplayEndpoint, WallError> {
        let (_, endpoint) = self
            .endpoints
            .remove(id)
            .ok_or_else(|| WallError::UnknownDisplay(id.clone()))?;
        if let Some((_, session)) = self.sessions.remove(id) {
            session.retire().await;
        }
        self.status.forget(id);
        tracing::info!(display = %id, "display removed");
        Ok(endpoint)
    }

    /// Replace the whole endpoint set.
    ///
    /// Vanished displays are removed, changed ones rebuilt on next use.
    /// Nothing is applied if any descriptor is invalid.
    pub async fn reload(&self, endpoints: Vec<DisplayEndpoint>) -> Result<ReloadSummary, WallError> {
        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            endpoint.validate()?;
            if !seen.insert(endpoint.id.clone()) {
                return Err(WallError::Config(format!("duplicate display id {}", endpoint.id)));
            }
        }

        let mut summary = ReloadSummary::default();
        for id in self.ids() {
            if !seen.contains(&id) {
                self.remove(&id).await?;
                summary.removed.push(id);
            }
        }
        for endpoint in endpoints {
            let id = endpoint.id.clone();
            let existed = self.contains(&id);
            if self.register(endpoint).await? {
                if existed {
                    summary.changed.push(id);
                } else {
                    summary.added.push(id);
                }
            }
        }
        Ok(summary)
    }

    /// Create every session up front. Returns how many were created now.
    pub fn warm_up(&self) -> usize {
        let mut created = 0;
        for id in self.ids() {
            if self.sessions.contains_key(&id) {
                continue;
            }
            match self.get_or_create(&id) {
                Ok(_) => created += 1,
                Err(e) => tracing::warn!(display = %id, error = %e, "could not create session"),
            }
        }
        created
    }

    /// Tear down every live session. Endpoints stay registered.
    pub async fn teardown_all(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|s| Arc::clone(s.value())).collect();
        for session in sessions {
            session.teardown().await;
        }
    }

    pub fn contains(&self, id: &DisplayId) -> bool {
        self.endpoints.contains_key(id)
    }

    pub fn endpoint(&self, id: &DisplayId) -> Option<DisplayEndpoint> {
        self.endpoints.get(id).map(|e| e.value().clone())
    }

    /// All endpoints, ordered by id.
    pub fn list(&self) -> Vec<DisplayEndpoint> {
        let mut all: Vec<_> = self.endpoints.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn ids(&self) -> Vec<DisplayId> {
        let mut ids: Vec<_> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
