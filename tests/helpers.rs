#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_nats::jetstream::kv::{Config, Store};
use quill::{
    accounts::{Accounts, NewUser},
    config::GateConfig,
    credentials::CredentialStore,
    gate::{AuthRequest, Gate},
    mail::{MailMessage, Mailer},
    storage::MemoryStore,
};

pub const SECRET: &str = "a test secret that is long enough";

/// Creates a new KV bucket for testing suffixed with the given name. This will first attempt to
/// delete the bucket if it exists to clean up from previous runs.
pub async fn get_store(test_name: &str) -> Store {
    let nc = async_nats::connect("127.0.0.1:4222")
        .await
        .expect("Unable to connect to NATS");
    let js = async_nats::jetstream::new(nc);

    let bucket_name = format!("testing_{test_name}");
    // Always try to delete the bucket to clean up from previous runs. It is easier than trying to
    // handle an async drop
    let _ = js.delete_key_value(&bucket_name).await;

    js.create_key_value(Config {
        bucket: bucket_name,
        description: format!("A quill test bucket for {test_name}"),
        storage: async_nats::jetstream::stream::StorageType::Memory,
        ..Default::default()
    })
    .await
    .expect("Unable to create bucket")
}

/// Keeps every message it is asked to send. Fails every send when `failing` is set.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    failing: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        RecordingMailer {
            failing: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("mail relay unavailable");
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub type TestGate = Gate<Accounts<MemoryStore>, RecordingMailer>;

pub struct Fixture {
    pub gate: TestGate,
    pub accounts: Accounts<MemoryStore>,
    pub mailer: RecordingMailer,
}

pub fn config() -> GateConfig {
    GateConfig::new(SECRET).expect("Test secret should be valid")
}

/// Builds a gate over an in memory store seeded with:
///
/// - `alice` / `hunter2`: usage on `default`, admin on `other`, e-mail `alice@example.org`
/// - `bob` / `bobsecret`: usage on `default`, must change password, e-mail `bob@example.org`
/// - `root` / `rootpass`: super administrator without any blog
/// - `nobody` / `nothing1`: no blogs at all
pub async fn fixture(allow_password_change: bool) -> Fixture {
    fixture_with_mailer(allow_password_change, RecordingMailer::default()).await
}

pub async fn fixture_with_mailer(allow_password_change: bool, mailer: RecordingMailer) -> Fixture {
    let accounts = Accounts::new(MemoryStore::new(), allow_password_change);
    for (user_id, password, email, super_admin, force) in [
        ("alice", "hunter2", Some("alice@example.org"), false, false),
        ("bob", "bobsecret", Some("bob@example.org"), false, true),
        ("root", "rootpass", None, true, false),
        ("nobody", "nothing1", None, false, false),
    ] {
        accounts
            .add_user(NewUser {
                user_id: user_id.to_string(),
                password: password.into(),
                email: email.map(ToString::to_string),
                super_admin,
                force_password_change: force,
            })
            .await
            .expect("Should be able to seed user");
    }
    for (user_id, blog, perm) in [
        ("alice", "default", "usage"),
        ("alice", "other", "admin"),
        ("bob", "default", "usage"),
    ] {
        accounts
            .grant_blog(user_id, blog, [perm.to_string()].into())
            .await
            .expect("Should be able to grant blog");
    }

    Fixture {
        gate: Gate::new(accounts.clone(), mailer.clone(), config()),
        accounts,
        mailer,
    }
}

pub fn password_login(user_id: &str, password: &str) -> AuthRequest {
    AuthRequest {
        user_id: Some(user_id.to_string()),
        password: Some(password.into()),
        client_signal: "test-agent/1.0".to_string(),
        ..Default::default()
    }
}

pub async fn password_is(accounts: &Accounts<MemoryStore>, user_id: &str, password: &str) -> bool {
    accounts
        .verify_password(user_id, &password.into())
        .await
        .expect("Should be able to verify password")
}

/// Pulls the value following `prefix` out of a mail body, up to the next whitespace
pub fn find_in_body(message: &MailMessage, prefix: &str) -> String {
    let start = message
        .body
        .find(prefix)
        .unwrap_or_else(|| panic!("Mail body should contain {prefix}"))
        + prefix.len();
    message.body[start..]
        .split_whitespace()
        .next()
        .expect("Value should follow the prefix")
        .to_string()
}
