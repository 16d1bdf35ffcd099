//! The engine facade.
//!
//! Every request goes through admission control, then session validation,
//! then the operation itself. Reads are served through the caches; writes go
//! to the source and invalidate the affected keys before returning.

use std::future::Future;
use std::sync::Arc;

use drivr_auth::session::hash_token;
use drivr_auth::{
    AccountStatus, Actor, AuditEntry, CredentialRecord, CredentialStorage, CredentialStore,
    MemoryCredentialStorage, MemorySessionStorage, RosterSyncReport, Session, SessionManager,
    SessionStorage,
};
use drivr_core::{CurrencyPolicy, CurrencyRecord, LoggedEvent, SharedClock, SystemClock, summarize};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheKey, CacheRead, CacheStats, ReadThroughCache, StalePolicy};
use crate::config::AppConfig;
use crate::error::{EngineError, EngineResult};
use crate::load::{AdmissionRequest, LoadMonitor, LoadSnapshot};
use crate::source::{
    DataSource, Mutation, ObjectStore, Query, ResilientSource, Row, SourceError, Table, WriteAck,
};

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub active_sessions: usize,
    pub events_cache: CacheStats,
    pub roster_cache: CacheStats,
    pub load: LoadSnapshot,
}

/// What one maintenance pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub sessions_swept: usize,
    pub cache_entries_purged: usize,
    pub idle_clients_pruned: usize,
}

/// Builder for [`Engine`].
///
/// Only the data source is required. Sessions and credentials default to
/// in-memory storage and time to the system clock.
pub struct EngineBuilder {
    config: AppConfig,
    source: Option<Arc<dyn DataSource>>,
    session_storage: Option<Arc<dyn SessionStorage>>,
    credential_storage: Option<Arc<dyn CredentialStorage>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    clock: Option<SharedClock>,
}

impl EngineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            source: None,
            session_storage: None,
            credential_storage: None,
            object_store: None,
            clock: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn DataSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn session_storage(mut self, storage: Arc<dyn SessionStorage>) -> Self {
        self.session_storage = Some(storage);
        self
    }

    pub fn credential_storage(mut self, storage: Arc<dyn CredentialStorage>) -> Self {
        self.credential_storage = Some(storage);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    ///
    /// Returns `Configuration` if the config is invalid or no source was set.
    pub fn build(self) -> EngineResult<Engine> {
        self.config
            .validate()
            .map_err(|e| EngineError::configuration(e.to_string()))?;
        let source = self
            .source
            .ok_or_else(|| EngineError::configuration("a data source is required"))?;

        let config = self.config;
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let credential_storage: Arc<dyn CredentialStorage> = match self.credential_storage {
            Some(storage) => storage,
            None => Arc::new(MemoryCredentialStorage::new()),
        };
        let session_storage: Arc<dyn SessionStorage> = match self.session_storage {
            Some(storage) => storage,
            None => Arc::new(MemorySessionStorage::new()),
        };

        let credentials = Arc::new(CredentialStore::new(
            credential_storage,
            config.auth.credentials.clone(),
            clock.clone(),
        ));
        let sessions = SessionManager::new(
            session_storage,
            credentials.clone(),
            clock.clone(),
            config.auth.session.ttl,
        );
        let source: Arc<dyn DataSource> = Arc::new(ResilientSource::new(
            source,
            config.upstream.timeout,
            config.upstream.retry_backoff,
        ));

        Ok(Engine {
            sessions,
            credentials,
            source,
            events: ReadThroughCache::new(config.cache.clone(), clock.clone()),
            roster: ReadThroughCache::new(config.cache.clone(), clock.clone()),
            load: LoadMonitor::new(config.throttle.clone(), clock.clone()),
            currency: config.currency.policy(),
            object_store: self.object_store,
            clock,
        })
    }
}

/// Session and data-consistency engine.
pub struct Engine {
    sessions: SessionManager,
    credentials: Arc<CredentialStore>,
    source: Arc<dyn DataSource>,
    events: ReadThroughCache<Arc<Vec<LoggedEvent>>>,
    roster: ReadThroughCache<Arc<Vec<String>>>,
    load: LoadMonitor,
    currency: CurrencyPolicy,
    object_store: Option<Arc<dyn ObjectStore>>,
    clock: SharedClock,
}

impl Engine {
    pub fn builder(config: AppConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// The injected blob store, for upload paths outside the engine.
    pub fn object_store(&self) -> Option<&Arc<dyn ObjectStore>> {
        self.object_store.as_ref()
    }

    /// Authenticate and open a session.
    ///
    /// # Errors
    ///
    /// `Throttled` when admission is denied, `AuthFailure` for a bad
    /// identity or secret.
    pub async fn login(&self, identity: &str, secret: &str) -> EngineResult<Session> {
        let request = AdmissionRequest::new(format!("login:{identity}"), None);
        let active = self.sessions.active_count().await?;
        let _permit = self.load.admit(&request, active)?;

        if let Err(e) = self.credentials.authenticate(identity, secret).await {
            tracing::warn!(identity = %identity, error = %e, "Login failed");
            return Err(e.into());
        }
        Ok(self.sessions.create_session(identity).await?)
    }

    /// Run `operation` for the session behind `token`.
    ///
    /// The admission permit is held until `operation` completes.
    ///
    /// # Errors
    ///
    /// `Throttled` when admission is denied, `Expired` or `AuthFailure` when
    /// the token is no longer valid, otherwise whatever `operation` returns.
    pub async fn authenticated_call<F, Fut, T>(&self, token: &str, operation: F) -> EngineResult<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let identity = self.sessions.peek_identity(token).await?;
        let request = AdmissionRequest::new(hash_token(token), identity);
        let active = self.sessions.active_count().await?;
        let _permit = self.load.admit(&request, active)?;

        let session = self.sessions.validate(token).await?.into_session()?;
        operation(session).await
    }

    /// Destroy the session behind `token`. Idempotent.
    pub async fn logout(&self, token: &str) -> EngineResult<()> {
        Ok(self.sessions.destroy(token).await?)
    }

    /// Currency records for `identity`, one per qualification.
    ///
    /// Drivers may read their own records, administrators anyone's.
    ///
    /// # Errors
    ///
    /// `Forbidden` for other drivers' records, `UpstreamUnavailable` when the
    /// event log cannot be read and no acceptable cached copy exists.
    pub async fn get_currency(
        &self,
        session: &Session,
        identity: &str,
        stale: StalePolicy,
    ) -> EngineResult<CacheRead<Vec<CurrencyRecord>>> {
        authorize_for(session, identity, "read another driver's currency")?;

        let events = self.load_events(identity, stale).await?;
        let now = self.clock.now();
        Ok(events.map(|events| summarize(identity, &events, now, &self.currency)))
    }

    async fn load_events(
        &self,
        identity: &str,
        stale: StalePolicy,
    ) -> EngineResult<CacheRead<Arc<Vec<LoggedEvent>>>> {
        let source = self.source.clone();
        let query = Query::events_for(identity);
        let owner = identity.to_string();
        self.events
            .get_or_load(&CacheKey::events(identity), stale, move || async move {
                let rows = source.read(&query).await?;
                Ok(Arc::new(parse_events(&owner, &rows)))
            })
            .await
    }

    /// Append a drive to the event log.
    ///
    /// The cached events for the driver are invalidated before this returns,
    /// so the next [`Engine::get_currency`] reflects the drive.
    ///
    /// # Errors
    ///
    /// `Forbidden` when logging for someone else without admin rights,
    /// `PolicyViolation` for a negative or non-finite distance,
    /// `UpstreamUnavailable` when the write fails.
    pub async fn record_event(&self, session: &Session, event: LoggedEvent) -> EngineResult<WriteAck> {
        authorize_for(session, &event.identity, "log drives for another driver")?;
        if !event.distance_km.is_finite() || event.distance_km < 0.0 {
            return Err(EngineError::PolicyViolation {
                message: "distance must be a non-negative number".into(),
            });
        }

        let row = event_row(&event)?;
        let key = CacheKey::events(&event.identity);
        match self.source.write(&Mutation::append(Table::MileageLog, row)).await {
            Ok(ack) => {
                self.events.invalidate(&key);
                tracing::info!(
                    identity = %event.identity,
                    qualification = %event.qualification,
                    distance_km = event.distance_km,
                    "Drive recorded"
                );
                Ok(ack)
            }
            Err(e) => {
                // A timed out append may still land upstream.
                if matches!(e, SourceError::Timeout(_)) {
                    self.events.invalidate(&key);
                }
                Err(e.into())
            }
        }
    }

    /// Change a secret. Administrators resetting another account's secret
    /// also revoke that account's sessions.
    pub async fn change_secret(
        &self,
        session: &Session,
        identity: &str,
        old_secret: Option<&str>,
        new_secret: &str,
    ) -> EngineResult<()> {
        self.credentials
            .change_secret(&actor(session), identity, old_secret, new_secret)
            .await?;
        if session.identity != identity {
            self.sessions.destroy_all_for(identity).await?;
        }
        Ok(())
    }

    /// Create accounts for roster identities that have none. Admin only.
    pub async fn sync_roster(&self, session: &Session) -> EngineResult<RosterSyncReport> {
        require_admin(session, "sync the roster")?;

        let source = self.source.clone();
        let roster = self
            .roster
            .get_or_load(&CacheKey::roster(), StalePolicy::Reject, move || async move {
                let rows = source.read(&Query::roster()).await?;
                Ok(Arc::new(parse_roster(&rows)))
            })
            .await?
            .into_value();

        Ok(self
            .credentials
            .upsert_from_external_roster(roster.iter())
            .await?)
    }

    /// Delete an account and revoke its sessions.
    pub async fn delete_account(&self, session: &Session, identity: &str) -> EngineResult<()> {
        self.credentials.delete(&actor(session), identity).await?;
        self.sessions.destroy_all_for(identity).await?;
        Ok(())
    }

    /// Grant or revoke admin rights. The target's sessions are revoked so the
    /// new role applies from the next login.
    pub async fn set_admin(&self, session: &Session, identity: &str, is_admin: bool) -> EngineResult<()> {
        self.credentials
            .set_admin(&actor(session), identity, is_admin)
            .await?;
        self.sessions.destroy_all_for(identity).await?;
        Ok(())
    }

    /// Enable or disable an account. Disabling revokes its sessions.
    pub async fn set_status(
        &self,
        session: &Session,
        identity: &str,
        status: AccountStatus,
    ) -> EngineResult<()> {
        self.credentials
            .set_status(&actor(session), identity, status)
            .await?;
        if !status.is_active() {
            self.sessions.destroy_all_for(identity).await?;
        }
        Ok(())
    }

    pub async fn list_accounts(&self, session: &Session) -> EngineResult<Vec<CredentialRecord>> {
        require_admin(session, "list accounts")?;
        Ok(self.credentials.list().await?)
    }

    pub async fn audit_log(&self, session: &Session) -> EngineResult<Vec<AuditEntry>> {
        require_admin(session, "read the audit log")?;
        Ok(self.credentials.audit_log().await?)
    }

    pub async fn stats(&self) -> EngineResult<EngineStats> {
        Ok(EngineStats {
            active_sessions: self.sessions.active_count().await?,
            events_cache: self.events.stats(),
            roster_cache: self.roster.stats(),
            load: self.load.snapshot(),
        })
    }

    /// Sweep expired sessions, purge dead cache entries and idle client
    /// windows. Failures are logged, never returned.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let sessions_swept = match self.sessions.sweep().await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "Session sweep failed");
                0
            }
        };
        MaintenanceReport {
            sessions_swept,
            cache_entries_purged: self.events.purge_expired() + self.roster.purge_expired(),
            idle_clients_pruned: self.load.prune_idle_clients(),
        }
    }
}

fn actor(session: &Session) -> Actor {
    Actor::new(session.identity.clone(), session.is_admin)
}

fn require_admin(session: &Session, action: &str) -> EngineResult<()> {
    if session.is_admin {
        Ok(())
    } else {
        Err(EngineError::forbidden(format!("only administrators can {action}")))
    }
}

fn authorize_for(session: &Session, identity: &str, action: &str) -> EngineResult<()> {
    if session.identity == identity {
        Ok(())
    } else {
        require_admin(session, action)
    }
}

fn event_row(event: &LoggedEvent) -> EngineResult<Row> {
    match serde_json::to_value(event) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(EngineError::internal("event did not serialize to a row")),
        Err(e) => Err(EngineError::internal(format!("failed to serialize event: {e}"))),
    }
}

fn parse_events(identity: &str, rows: &[Row]) -> Vec<LoggedEvent> {
    rows.iter()
        .filter_map(|row| {
            match serde_json::from_value::<LoggedEvent>(Value::Object(row.clone())) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "Skipping malformed mileage row");
                    None
                }
            }
        })
        .collect()
}

fn parse_roster(rows: &[Row]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("identity").and_then(Value::as_str))
        .map(str::trim)
        .filter(|identity| !identity.is_empty())
        .map(str::to_string)
        .collect()
}
