//! Single-writer session registry.
//!
//! The registry owns the session store. Every operation is a message on an
//! mpsc channel answered over a oneshot, and the worker task runs each
//! load→mutate→save cycle to completion before picking up the next command.
//! Two requests can therefore never interleave their snapshots of the blob,
//! which is what makes the whole-file store safe to use from concurrent
//! handlers.
//!
//! Expiry is enforced lazily on every lookup (token and alias lookups share
//! one liveness path) and eagerly by a periodic sweep.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::AuthError;
use crate::metrics::Metrics;
use crate::records::{
    AliasId, Identifier, Principal, PurgeOutcome, Role, SessionRecord, SessionToken, ALIAS_LEN,
};
use crate::store::SessionStore;

/// Command channel depth. Senders briefly queue under burst load; the worker
/// drains strictly in order.
const COMMAND_BUFFER: usize = 64;

/// Charset for alias ids: URL-safe without escaping, double-click selectable.
const ALIAS_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// 32 CSPRNG bytes, hex-encoded: 64 chars, 256 bits of entropy.
fn generate_token() -> SessionToken {
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    SessionToken::new(hex::encode(bytes))
}

fn generate_alias_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ALIAS_LEN)
        .map(|_| ALIAS_CHARSET[rng.gen_range(0..ALIAS_CHARSET.len())] as char)
        .collect()
}

/// What `create_session` hands back: the bearer token, the URL-safe alias
/// bound to it, and the shared expiry instant.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: SessionToken,
    pub alias: AliasId,
    pub expires_at: DateTime<Utc>,
}

/// Registry construction parameters.
pub struct RegistryOptions {
    /// Lifetime of newly issued sessions. Defaults to 24 hours.
    pub session_ttl: Duration,
    /// How often the background sweep collects expired pairs. The first
    /// sweep runs at startup, clearing leftovers from a previous process.
    pub sweep_interval: StdDuration,
    pub metrics: Metrics,
}

impl RegistryOptions {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            session_ttl: Duration::hours(24),
            sweep_interval: StdDuration::from_secs(3600),
            metrics,
        }
    }
}

enum Command {
    Create {
        role: Role,
        subject: String,
        display_name: Option<String>,
        ttl: Duration,
        reply: oneshot::Sender<Result<IssuedSession, AuthError>>,
    },
    Validate {
        identifier: Identifier,
        reply: oneshot::Sender<Option<Principal>>,
    },
    Resolve {
        alias: AliasId,
        reply: oneshot::Sender<Option<SessionToken>>,
    },
    Clear {
        token: SessionToken,
        reply: oneshot::Sender<Result<bool, AuthError>>,
    },
    Purge {
        reply: oneshot::Sender<Result<PurgeOutcome, AuthError>>,
    },
}

/// Cloneable handle to the registry worker.
///
/// Lookup methods (`validate`, `resolve_token`) fail closed: if the worker is
/// gone they answer "not authenticated" rather than erroring.
#[derive(Clone)]
pub struct SessionRegistry {
    tx: mpsc::Sender<Command>,
    session_ttl: Duration,
}

impl SessionRegistry {
    /// Start the worker task and return a handle to it.
    pub fn spawn(
        store: Box<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        options: RegistryOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = Worker {
            store,
            clock,
            metrics: options.metrics,
        };
        tokio::spawn(worker.run(rx, options.sweep_interval));
        Self {
            tx,
            session_ttl: options.session_ttl,
        }
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Mint a session with the default ttl. The token and alias are written
    /// to the store in the same save; a failed save creates nothing.
    pub async fn create_session(
        &self,
        role: Role,
        subject: impl Into<String>,
        display_name: Option<String>,
    ) -> Result<IssuedSession, AuthError> {
        self.create_session_with_ttl(role, subject, display_name, self.session_ttl)
            .await
    }

    pub async fn create_session_with_ttl(
        &self,
        role: Role,
        subject: impl Into<String>,
        display_name: Option<String>,
        ttl: Duration,
    ) -> Result<IssuedSession, AuthError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Create {
                role,
                subject: subject.into(),
                display_name,
                ttl,
                reply,
            })
            .await
            .map_err(|_| AuthError::RegistryClosed)?;
        rx.await.map_err(|_| AuthError::RegistryClosed)?
    }

    /// Check an identifier and return the principal it proves, if any.
    /// Observing an expired session deletes it before answering.
    pub async fn validate(&self, identifier: impl Into<Identifier>) -> Option<Principal> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Validate {
            identifier: identifier.into(),
            reply,
        };
        if self.tx.send(command).await.is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Map an alias back to its live token. Same liveness and eviction rules
    /// as `validate`.
    pub async fn resolve_token(&self, alias: AliasId) -> Option<SessionToken> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Resolve { alias, reply }).await.is_err() {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Delete a session and its alias together. Returns whether anything was
    /// removed; clearing an unknown token is a no-op.
    pub async fn clear(&self, token: SessionToken) -> Result<bool, AuthError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Clear { token, reply })
            .await
            .map_err(|_| AuthError::RegistryClosed)?;
        rx.await.map_err(|_| AuthError::RegistryClosed)?
    }

    /// Run a sweep now instead of waiting for the interval.
    pub async fn purge_expired(&self) -> Result<PurgeOutcome, AuthError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Purge { reply })
            .await
            .map_err(|_| AuthError::RegistryClosed)?;
        rx.await.map_err(|_| AuthError::RegistryClosed)?
    }
}

struct Worker {
    store: Box<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, sweep_interval: StdDuration) {
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = sweep.tick() => {
                    if let Err(e) = self.purge().await {
                        warn!(error = %e, "periodic session sweep failed");
                    }
                }
            }
        }
        debug!("session registry stopped");
    }

    async fn handle(&mut self, command: Command) {
        // Callers may drop their oneshot; the operation has already been
        // applied by then, so send failures are ignored.
        match command {
            Command::Create {
                role,
                subject,
                display_name,
                ttl,
                reply,
            } => {
                let _ = reply.send(self.create(role, subject, display_name, ttl).await);
            }
            Command::Validate { identifier, reply } => {
                let principal = self
                    .live_session(&identifier)
                    .await
                    .map(|record| record.principal());
                let _ = reply.send(principal);
            }
            Command::Resolve { alias, reply } => {
                let token = self
                    .live_session(&Identifier::Alias(alias))
                    .await
                    .map(|record| record.token);
                let _ = reply.send(token);
            }
            Command::Clear { token, reply } => {
                let _ = reply.send(self.clear(&token).await);
            }
            Command::Purge { reply } => {
                let _ = reply.send(self.purge().await);
            }
        }
    }

    async fn create(
        &mut self,
        role: Role,
        subject: String,
        display_name: Option<String>,
        ttl: Duration,
    ) -> Result<IssuedSession, AuthError> {
        let mut map = self.store.load().await;

        // Re-draw on collision with anything already stored. The alias
        // keyspace is shared by both roles, so a fresh id can never equal a
        // live id of either kind.
        let mut token = generate_token();
        while map.contains_token(&token) {
            token = generate_token();
        }
        let mut alias_id = generate_alias_id();
        while map.alias_in_use(&alias_id) {
            alias_id = generate_alias_id();
        }

        let record = SessionRecord::new(
            token.clone(),
            role,
            subject,
            display_name,
            alias_id,
            self.clock.now(),
            ttl,
        );
        let alias = record.alias();
        let expires_at = record.expires_at;
        map.insert(record);
        self.store.save(&map).await?;

        self.metrics
            .sessions_created_total
            .with_label_values(&[role.as_str()])
            .inc();
        debug!(role = %role, alias = %alias, "session created");
        Ok(IssuedSession {
            token,
            alias,
            expires_at,
        })
    }

    /// The one liveness path shared by token and alias lookups. An expired
    /// record is deleted (both entries) and persisted before answering.
    async fn live_session(&mut self, identifier: &Identifier) -> Option<SessionRecord> {
        let mut map = self.store.load().await;
        let record = match identifier {
            Identifier::Token(token) => map.get(token).cloned(),
            Identifier::Alias(alias) => map.resolve(alias).cloned(),
        };
        let Some(record) = record else {
            self.metrics
                .validations_total
                .with_label_values(&["unknown"])
                .inc();
            return None;
        };

        if record.is_live(self.clock.now()) {
            self.metrics
                .validations_total
                .with_label_values(&["valid"])
                .inc();
            return Some(record);
        }

        map.remove(&record.token);
        if let Err(e) = self.store.save(&map).await {
            // The answer is still "signed out"; the next access retries the
            // delete.
            warn!(error = %e, "failed to persist lazy eviction");
        }
        self.metrics
            .validations_total
            .with_label_values(&["expired"])
            .inc();
        self.metrics.sessions_evicted_total.inc();
        debug!(role = %record.role, alias = %record.alias_id, "expired session evicted on access");
        None
    }

    async fn clear(&mut self, token: &SessionToken) -> Result<bool, AuthError> {
        let mut map = self.store.load().await;
        match map.remove(token) {
            Some(record) => {
                self.store.save(&map).await?;
                debug!(role = %record.role, alias = %record.alias_id, "session cleared");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn purge(&mut self) -> Result<PurgeOutcome, AuthError> {
        let mut map = self.store.load().await;
        let outcome = map.purge_expired(self.clock.now());
        if outcome.total() > 0 {
            self.store.save(&map).await?;
            self.metrics
                .sessions_evicted_total
                .inc_by(outcome.total() as u64);
            info!(
                expired = outcome.expired,
                orphaned = outcome.orphaned,
                remaining = map.session_count(),
                "purged stale sessions"
            );
        }
        Ok(outcome)
    }
}
