use std::{
    collections::HashMap,
    fmt::{Debug, Display},
    future::Future,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::Context;
use async_nats::jetstream::kv::Store;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use tokio::sync::RwLock;
use tracing::{instrument, trace};

use crate::types::SessionRecord;

const SESSION_ID_LEN: usize = 32;

/// The opaque id of a server side session, as carried by the session cookie
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        Self(
            std::iter::repeat(())
                .map(|()| OsRng.sample(Alphanumeric))
                .map(char::from)
                .take(SESSION_ID_LEN)
                .collect(),
        )
    }

    /// Parses a session id from a cookie. Anything that could not have been generated here is
    /// rejected without touching the store.
    pub fn parse(raw: &str) -> Option<Self> {
        (raw.len() == SESSION_ID_LEN && raw.bytes().all(|b| b.is_ascii_alphanumeric()))
            .then(|| Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Session ids are bearer credentials, only ever log a prefix
impl Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "SessionId({}…)", &self.0[..self.0.len().min(6)])
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server side storage of admin sessions
pub trait SessionStore: Send + Sync {
    /// Opens a new session for the user, returning its id
    fn start(
        &self,
        user_id: &str,
        fingerprint: &str,
    ) -> impl Future<Output = anyhow::Result<SessionId>> + Send;

    /// Binds the session to the blog the user will be working on
    fn bind_blog(
        &self,
        session: &SessionId,
        blog_id: &str,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Marks the session as running in safe mode
    fn set_safe_mode(&self, session: &SessionId) -> impl Future<Output = anyhow::Result<()>> + Send;

    fn get(
        &self,
        session: &SessionId,
    ) -> impl Future<Output = anyhow::Result<Option<SessionRecord>>> + Send;

    /// Removes the session. Destroying an unknown session is not an error.
    fn destroy(&self, session: &SessionId) -> impl Future<Output = anyhow::Result<()>> + Send;
}

fn new_record(user_id: &str, fingerprint: &str) -> anyhow::Result<SessionRecord> {
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("Unable to calculate current system time")?;
    Ok(SessionRecord {
        user_id: user_id.to_owned(),
        browser_fingerprint: fingerprint.to_owned(),
        blog_id: None,
        safe_mode: false,
        created_at,
    })
}

/// Sessions kept in a NATS KV bucket. Expiry is left to the bucket's `max_age`.
#[derive(Clone)]
pub struct KvSessionStore {
    store: Store,
}

impl KvSessionStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    async fn put(&self, session: &SessionId, record: &SessionRecord) -> anyhow::Result<()> {
        let value = bincode::encode_to_vec(record, bincode::config::standard())
            .context("Unable to encode session")?;
        self.store
            .put(session.as_str(), value.into())
            .await
            .context("Unable to write session to store")?;
        Ok(())
    }

    async fn update<F>(&self, session: &SessionId, modify: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut SessionRecord) + Send,
    {
        let mut record = self
            .get(session)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Session does not exist"))?;
        modify(&mut record);
        self.put(session, &record).await
    }
}

impl SessionStore for KvSessionStore {
    #[instrument(level = "debug", skip(self, fingerprint))]
    async fn start(&self, user_id: &str, fingerprint: &str) -> anyhow::Result<SessionId> {
        let session = SessionId::generate();
        let record = new_record(user_id, fingerprint)?;
        // Ids are random enough that a collision means something is badly wrong, so create rather
        // than put
        let value = bincode::encode_to_vec(&record, bincode::config::standard())
            .context("Unable to encode session")?;
        self.store
            .create(session.as_str(), value.into())
            .await
            .context("Unable to create session in store")?;
        trace!(?session, "Session started");
        Ok(session)
    }

    #[instrument(level = "debug", skip(self))]
    async fn bind_blog(&self, session: &SessionId, blog_id: &str) -> anyhow::Result<()> {
        let blog_id = blog_id.to_owned();
        self.update(session, move |record| record.blog_id = Some(blog_id))
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn set_safe_mode(&self, session: &SessionId) -> anyhow::Result<()> {
        self.update(session, |record| record.safe_mode = true).await
    }

    #[instrument(level = "trace", skip(self))]
    async fn get(&self, session: &SessionId) -> anyhow::Result<Option<SessionRecord>> {
        let Some(value) = self
            .store
            .get(session.as_str())
            .await
            .context("Unable to fetch session from store")?
        else {
            return Ok(None);
        };
        let (record, _): (SessionRecord, _) =
            bincode::decode_from_slice(&value, bincode::config::standard())
                .context("Unable to decode session from store")?;
        Ok(Some(record))
    }

    #[instrument(level = "debug", skip(self))]
    async fn destroy(&self, session: &SessionId) -> anyhow::Result<()> {
        self.store
            .purge(session.as_str())
            .await
            .context("Unable to delete session from store")?;
        Ok(())
    }
}

/// An in process session store. Used for tests and for running the server without NATS.
#[derive(Default, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open sessions
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// All sessions currently open for the given user
    pub async fn sessions_for(&self, user_id: &str) -> Vec<SessionRecord> {
        self.sessions
            .read()
            .await
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect()
    }
}

impl SessionStore for MemorySessionStore {
    async fn start(&self, user_id: &str, fingerprint: &str) -> anyhow::Result<SessionId> {
        let session = SessionId::generate();
        let record = new_record(user_id, fingerprint)?;
        self.sessions.write().await.insert(session.clone(), record);
        Ok(session)
    }

    async fn bind_blog(&self, session: &SessionId, blog_id: &str) -> anyhow::Result<()> {
        let mut lock = self.sessions.write().await;
        let record = lock
            .get_mut(session)
            .ok_or_else(|| anyhow::anyhow!("Session does not exist"))?;
        record.blog_id = Some(blog_id.to_owned());
        Ok(())
    }

    async fn set_safe_mode(&self, session: &SessionId) -> anyhow::Result<()> {
        let mut lock = self.sessions.write().await;
        let record = lock
            .get_mut(session)
            .ok_or_else(|| anyhow::anyhow!("Session does not exist"))?;
        record.safe_mode = true;
        Ok(())
    }

    async fn get(&self, session: &SessionId) -> anyhow::Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(session).cloned())
    }

    async fn destroy(&self, session: &SessionId) -> anyhow::Result<()> {
        self.sessions.write().await.remove(session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::generate();
        assert_eq!(SessionId::parse(id.as_str()), Some(id.clone()));
        assert!(SessionId::parse("short").is_none());
        assert!(SessionId::parse(&"!".repeat(SESSION_ID_LEN)).is_none());
        assert!(!format!("{id:?}").contains(id.as_str()));
    }

    #[tokio::test]
    async fn test_memory_session_lifecycle() {
        let store = MemorySessionStore::new();
        let session = store
            .start("alice", "fingerprint")
            .await
            .expect("Should be able to start a session");
        store.bind_blog(&session, "default").await.unwrap();
        store.set_safe_mode(&session).await.unwrap();

        let record = store.get(&session).await.unwrap().expect("Session should exist");
        assert_eq!(record.user_id, "alice");
        assert_eq!(record.browser_fingerprint, "fingerprint");
        assert_eq!(record.blog_id.as_deref(), Some("default"));
        assert!(record.safe_mode);

        store.destroy(&session).await.unwrap();
        assert!(store.get(&session).await.unwrap().is_none());
        assert!(store.is_empty().await);
        assert!(
            store.bind_blog(&session, "default").await.is_err(),
            "Destroyed sessions cannot be modified"
        );
    }
}
