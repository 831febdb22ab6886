//! Where user records live.
//!
//! Records are keyed by user id. Reads may be served from a cache, but every change goes through
//! [`UserRepository::update_user`], which applies a closure to the freshest stored copy and only
//! writes it back if nobody else changed the record in the meantime.

use std::{collections::HashMap, future::Future, sync::Arc};

use anyhow::Context;
use async_nats::jetstream::kv::{CreateErrorKind, Entry, Operation, Store, UpdateErrorKind};
use futures::{StreamExt, TryStreamExt};
use tokio::{sync::RwLock, task::AbortHandle};
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

use crate::{error::Result, types::UserInfo};

/// How many times a conflicting update is retried before giving up
const MAX_UPDATE_ATTEMPTS: usize = 5;
const KEY_PREFIX: &str = "user.";

/// Persistence for user records, keyed by user id
pub trait UserRepository: Send + Sync {
    /// Fetches the user. Returns None if the user doesn't exist
    fn get_user(&self, user_id: &str) -> impl Future<Output = Option<UserInfo>> + Send;

    /// Stores a new user. Returns false, without touching anything, if the id is already taken.
    fn create_user(
        &self,
        user_id: &str,
        info: UserInfo,
    ) -> impl Future<Output = anyhow::Result<bool>> + Send;

    /// Runs `update` on the current record and stores the result. If the record changed between
    /// the read and the write, the update is run again on the new record. Nothing is written when
    /// `update` fails. Returns `None` if the user doesn't exist.
    fn update_user<T, F>(
        &self,
        user_id: &str,
        update: F,
    ) -> impl Future<Output = Result<Option<T>>> + Send
    where
        T: Send,
        F: FnMut(&mut UserInfo) -> Result<T> + Send;

    fn delete_user(&self, user_id: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Lists all user ids, sorted
    fn list_users(&self) -> impl Future<Output = anyhow::Result<Vec<String>>> + Send;
}

/// User ids are free text but KV keys are not, so the id is hex encoded into the key
fn user_key(user_id: &str) -> String {
    format!("{KEY_PREFIX}{}", hex::encode(user_id))
}

fn user_id_from_key(key: &str) -> Option<String> {
    let bytes = hex::decode(key.strip_prefix(KEY_PREFIX)?).ok()?;
    String::from_utf8(bytes).ok()
}

fn encode_user(info: &UserInfo) -> anyhow::Result<Vec<u8>> {
    bincode::encode_to_vec(info, bincode::config::standard()).context("Unable to encode user")
}

fn decode_user(raw: &[u8]) -> anyhow::Result<UserInfo> {
    bincode::decode_from_slice(raw, bincode::config::standard())
        .map(|(info, _)| info)
        .context("Unable to decode user")
}

type UserCache = Arc<RwLock<HashMap<String, UserInfo>>>;

/// User records in a NATS KV bucket. Reads come from a local copy of the bucket that a watcher
/// keeps current. Writes go to the bucket first and are checked against the entry revision.
pub struct CredStore {
    store: Store,
    cache: UserCache,
    watcher: AbortHandle,
}

impl Drop for CredStore {
    fn drop(&mut self) {
        self.watcher.abort()
    }
}

impl CredStore {
    /// Loads every user into the local copy and starts following the bucket. Returns once the
    /// copy is complete.
    #[instrument(level = "info", skip_all)]
    pub async fn new(store: Store) -> anyhow::Result<Self> {
        let cache = UserCache::default();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let task = tokio::spawn(
            follow_bucket(store.clone(), cache.clone(), ready_tx)
                .instrument(tracing::info_span!("user_cache")),
        );
        ready_rx
            .await
            .context("User cache task stopped before it was ready")??;
        info!(users = cache.read().await.len(), "User cache ready");

        Ok(Self {
            store,
            cache,
            watcher: task.abort_handle(),
        })
    }

    async fn remember(&self, user_id: &str, info: UserInfo) {
        self.cache.write().await.insert(user_id.to_owned(), info);
    }
}

/// Fills the cache and then applies every change seen on the bucket. The watch is opened before
/// the initial load so no change can fall between the two.
async fn follow_bucket(
    store: Store,
    cache: UserCache,
    ready: tokio::sync::oneshot::Sender<anyhow::Result<()>>,
) {
    let setup = async {
        let watcher = store
            .watch_all()
            .await
            .context("Unable to watch user bucket")?;
        let users = load_all(&store).await?;
        *cache.write().await = users;
        anyhow::Ok(watcher)
    };
    let mut watcher = match setup.await {
        Ok(watcher) => watcher,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    while let Some(res) = watcher.next().await {
        match res {
            Ok(entry) => apply_entry(entry, &cache).await,
            Err(err) => error!(%err, "Unable to receive user change"),
        }
    }
    warn!("User bucket watch ended, cache is no longer updated");
}

async fn load_all(store: &Store) -> anyhow::Result<HashMap<String, UserInfo>> {
    let keys: Vec<String> = store
        .keys()
        .await
        .context("Unable to list user keys")?
        .try_collect()
        .await
        .context("Unable to list user keys")?;

    let mut users = HashMap::with_capacity(keys.len());
    for key in keys {
        let Some(user_id) = user_id_from_key(&key) else {
            warn!(%key, "Skipping key that does not name a user");
            continue;
        };
        let Some(entry) = store
            .entry(key)
            .await
            .context("Unable to fetch user entry")?
        else {
            continue;
        };
        if matches!(entry.operation, Operation::Put) {
            users.insert(user_id, decode_user(&entry.value)?);
        }
    }
    Ok(users)
}

#[instrument(level = "debug", skip_all, fields(key = %entry.key, operation = ?entry.operation))]
async fn apply_entry(entry: Entry, cache: &UserCache) {
    let Some(user_id) = user_id_from_key(&entry.key) else {
        trace!("Ignoring key that does not name a user");
        return;
    };
    match entry.operation {
        Operation::Delete | Operation::Purge => {
            cache.write().await.remove(&user_id);
        }
        Operation::Put => match decode_user(&entry.value) {
            Ok(info) => {
                cache.write().await.insert(user_id, info);
            }
            Err(err) => error!(%err, "Dropping undecodable user change"),
        },
    }
}

impl UserRepository for CredStore {
    async fn get_user(&self, user_id: &str) -> Option<UserInfo> {
        self.cache.read().await.get(user_id).cloned()
    }

    #[instrument(level = "debug", skip(self, info))]
    async fn create_user(&self, user_id: &str, info: UserInfo) -> anyhow::Result<bool> {
        let value = encode_user(&info)?;
        match self.store.create(user_key(user_id), value.into()).await {
            Ok(_) => {
                self.remember(user_id, info).await;
                Ok(true)
            }
            Err(err) if err.kind() == CreateErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err).context("Unable to create user"),
        }
    }

    #[instrument(level = "debug", skip(self, update))]
    async fn update_user<T, F>(&self, user_id: &str, mut update: F) -> Result<Option<T>>
    where
        T: Send,
        F: FnMut(&mut UserInfo) -> Result<T> + Send,
    {
        let key = user_key(user_id);
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let entry = self
                .store
                .entry(key.as_str())
                .await
                .context("Unable to fetch user entry")?;
            let Some(entry) = entry.filter(|e| matches!(e.operation, Operation::Put)) else {
                return Ok(None);
            };
            let mut info = decode_user(&entry.value)?;
            let out = update(&mut info)?;

            match self
                .store
                .update(key.as_str(), encode_user(&info)?.into(), entry.revision)
                .await
            {
                Ok(_) => {
                    self.remember(user_id, info).await;
                    return Ok(Some(out));
                }
                Err(err) if err.kind() == UpdateErrorKind::WrongLastRevision => {
                    debug!(attempt, "User changed underneath update, retrying");
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context("Unable to store user")
                        .into())
                }
            }
        }
        Err(anyhow::anyhow!("User kept changing during update, gave up").into())
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_user(&self, user_id: &str) -> anyhow::Result<()> {
        self.store
            .purge(user_key(user_id))
            .await
            .context("Unable to delete user")?;
        self.cache.write().await.remove(user_id);
        Ok(())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<String>> {
        let mut users: Vec<String> = self.cache.read().await.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

/// User records held in process. Used by tests and by the server's `--in-memory` mode.
#[derive(Default, Clone)]
pub struct MemoryStore {
    users: UserCache,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserRepository for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Option<UserInfo> {
        self.users.read().await.get(user_id).cloned()
    }

    async fn create_user(&self, user_id: &str, info: UserInfo) -> anyhow::Result<bool> {
        let mut users = self.users.write().await;
        if users.contains_key(user_id) {
            return Ok(false);
        }
        users.insert(user_id.to_owned(), info);
        Ok(true)
    }

    async fn update_user<T, F>(&self, user_id: &str, mut update: F) -> Result<Option<T>>
    where
        T: Send,
        F: FnMut(&mut UserInfo) -> Result<T> + Send,
    {
        let mut users = self.users.write().await;
        let Some(stored) = users.get_mut(user_id) else {
            return Ok(None);
        };
        let mut info = stored.clone();
        let out = update(&mut info)?;
        *stored = info;
        Ok(Some(out))
    }

    async fn delete_user(&self, user_id: &str) -> anyhow::Result<()> {
        self.users.write().await.remove(user_id);
        Ok(())
    }

    async fn list_users(&self) -> anyhow::Result<Vec<String>> {
        let mut users: Vec<String> = self.users.read().await.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}
