//! Session data model: roles, tokens, alias ids, and the persisted session map.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Length of a URL-embedded alias id.
pub const ALIAS_LEN: usize = 12;

/// Principal class a session belongs to.
///
/// A client may hold one live session of each role at the same time; the two
/// never share identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque bearer secret keying a session record (64-char hex).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bearer secret: never print more than a prefix.
        let end = self.0.len().min(8);
        write!(f, "SessionToken({}..)", &self.0[..end])
    }
}

/// Short URL-safe session reference: a 12-char id plus the role it was issued
/// for. Resolution requires both to match, so an id leaked into the wrong
/// query parameter identifies nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AliasId {
    role: Role,
    id: String,
}

impl AliasId {
    /// Accept an id of the exact alias shape (12 alphanumeric chars).
    /// Anything else is not an alias and cannot reference a session.
    pub fn parse(role: Role, id: &str) -> Option<Self> {
        if id.len() == ALIAS_LEN && id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            Some(Self {
                role,
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    /// Construct from a freshly generated id. Callers must only pass ids
    /// drawn from the alias charset.
    pub(crate) fn from_generated(role: Role, id: String) -> Self {
        debug_assert!(id.len() == ALIAS_LEN);
        Self { role, id }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for AliasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Alias ids are URL-visible, safe to print whole.
        write!(f, "{}:{}", self.role, self.id)
    }
}

/// Either way of referencing a session. Validation dispatches on the variant;
/// there is no length sniffing anywhere.
#[derive(Debug, Clone)]
pub enum Identifier {
    Token(SessionToken),
    Alias(AliasId),
}

impl From<SessionToken> for Identifier {
    fn from(token: SessionToken) -> Self {
        Identifier::Token(token)
    }
}

impl From<AliasId> for Identifier {
    fn from(alias: AliasId) -> Self {
        Identifier::Alias(alias)
    }
}

/// The authenticated identity a valid session proves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub role: Role,
    /// Admin username, or the OAuth-verified email address.
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// One authenticated session, keyed by its token in the persisted map.
/// Immutable after creation; expiry deletes it, nothing renews it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token: SessionToken,
    pub role: Role,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// The bound alias id (the id alone; its role is this record's role).
    pub alias_id: String,
}

impl SessionRecord {
    pub fn new(
        token: SessionToken,
        role: Role,
        subject: impl Into<String>,
        display_name: Option<String>,
        alias_id: String,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            token,
            role,
            subject: subject.into(),
            display_name,
            created_at,
            expires_at: created_at + ttl,
            alias_id,
        }
    }

    /// A record is live strictly before its expiry instant. At exactly
    /// `created_at + ttl` it is already dead.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn principal(&self) -> Principal {
        Principal {
            role: self.role,
            subject: self.subject.clone(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn alias(&self) -> AliasId {
        AliasId {
            role: self.role,
            id: self.alias_id.clone(),
        }
    }
}

/// Alias-table entry pointing back at its session token. `expires_at` is a
/// copy of the session record's value and the two are only ever written or
/// deleted together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub token: SessionToken,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

impl AliasRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// What a purge pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Token/alias pairs dropped because their expiry instant passed.
    pub expired: usize,
    /// One-sided or mismatched entries dropped as corrupt.
    pub orphaned: usize,
}

impl PurgeOutcome {
    pub fn total(&self) -> usize {
        self.expired + self.orphaned
    }
}

/// In-memory image of the whole persisted store: the session table keyed by
/// token and the alias table keyed by id. Alias ids live in a single keyspace
/// shared by both roles, so cross-role uniqueness is structural.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMap {
    tokens: HashMap<String, SessionRecord>,
    aliases: HashMap<String, AliasRecord>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.aliases.is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn contains_token(&self, token: &SessionToken) -> bool {
        self.tokens.contains_key(token.as_str())
    }

    pub fn alias_in_use(&self, id: &str) -> bool {
        self.aliases.contains_key(id)
    }

    /// Insert a session and its alias entry together.
    pub fn insert(&mut self, record: SessionRecord) {
        self.aliases.insert(
            record.alias_id.clone(),
            AliasRecord {
                token: record.token.clone(),
                role: record.role,
                expires_at: record.expires_at,
            },
        );
        self.tokens.insert(record.token.as_str().to_string(), record);
    }

    pub fn get(&self, token: &SessionToken) -> Option<&SessionRecord> {
        self.tokens.get(token.as_str())
    }

    /// Resolve an alias to its session record. The stored role must match the
    /// alias role, and the record must claim this alias back; a one-sided or
    /// mismatched pair resolves to nothing.
    pub fn resolve(&self, alias: &AliasId) -> Option<&SessionRecord> {
        let entry = self.aliases.get(alias.id())?;
        if entry.role != alias.role() {
            return None;
        }
        let record = self.tokens.get(entry.token.as_str())?;
        if record.alias_id != alias.id() {
            return None;
        }
        Some(record)
    }

    /// Remove a session and its alias entry together.
    pub fn remove(&mut self, token: &SessionToken) -> Option<SessionRecord> {
        let record = self.tokens.remove(token.as_str())?;
        self.aliases.remove(&record.alias_id);
        Some(record)
    }

    /// Two-phase cleanup: drop every pair whose expiry instant has passed,
    /// then drop one-sided leftovers (token without an agreeing alias, alias
    /// without its token). Idempotent.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> PurgeOutcome {
        let before = self.tokens.len();
        self.tokens.retain(|_, record| record.is_live(now));
        self.aliases.retain(|_, entry| entry.is_live(now));
        let expired = before - self.tokens.len();

        let mut orphaned = 0usize;
        let aliases = &self.aliases;
        self.tokens.retain(|_, record| {
            let bound = aliases
                .get(&record.alias_id)
                .map(|entry| entry.token == record.token)
                .unwrap_or(false);
            if !bound {
                orphaned += 1;
            }
            bound
        });
        let tokens = &self.tokens;
        self.aliases.retain(|id, entry| {
            let bound = tokens
                .get(entry.token.as_str())
                .map(|record| &record.alias_id == id)
                .unwrap_or(false);
            if !bound {
                orphaned += 1;
            }
            bound
        });

        PurgeOutcome { expired, orphaned }
    }

    /// Iterate over session records (sweep logging, tests).
    pub fn sessions(&self) -> impl Iterator<Item = &SessionRecord> {
        self.tokens.values()
    }
}
