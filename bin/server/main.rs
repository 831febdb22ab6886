use std::{io::IsTerminal, time::Duration};

use anyhow::Context;
use async_nats::jetstream::{self, kv::Config, stream::StorageType};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quill::{
    accounts::{Accounts, NewUser},
    config::GateConfig,
    error::AuthError,
    gate::Gate,
    mail::{LogMailer, Mailer, NatsMailer},
    servers::HttpServer,
    sessions::{KvSessionStore, MemorySessionStore, SessionStore},
    storage::{CredStore, MemoryStore, UserRepository},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The NATS JetStream domain to connect to
    #[arg(short = 'd', env = "QUILL_JS_DOMAIN")]
    js_domain: Option<String>,

    /// The NATS server to connect to
    #[arg(short = 's', default_value = "127.0.0.1", env = "QUILL_NATS_SERVER")]
    nats_server: String,

    /// The NATS port to connect to
    #[arg(short = 'p', default_value_t = 4222, env = "QUILL_NATS_PORT")]
    nats_port: u16,

    /// The name of the KeyValue bucket to store users in
    #[arg(short = 'b', default_value = "quill_users", env = "QUILL_USER_BUCKET")]
    user_bucket: String,

    /// The name of the KeyValue bucket to store sessions in
    #[arg(long = "session-bucket", default_value = "quill_sessions", env = "QUILL_SESSION_BUCKET")]
    session_bucket: String,

    /// How long a session lives, in hours. Only applied when the session bucket is created here
    #[arg(long = "session-ttl", default_value_t = 24, env = "QUILL_SESSION_TTL_HOURS")]
    session_ttl_hours: u64,

    /// How long a password recovery key stays valid, in hours
    #[arg(long = "recover-key-ttl", default_value_t = 24, env = "QUILL_RECOVER_KEY_TTL_HOURS")]
    recover_key_ttl_hours: u64,

    /// The NATS subject recovery e-mails are published on for a mail relay to deliver
    #[arg(long = "mail-subject", env = "QUILL_MAIL_SUBJECT")]
    mail_subject: Option<String>,

    /// The server secret everything handed to browsers is derived from. Must be at least 16
    /// bytes long and stay the same across restarts or all remember-me cookies stop working
    #[arg(long = "secret", env = "QUILL_SECRET", hide_env_values = true)]
    secret: String,

    /// Only send cookies over HTTPS
    #[arg(long = "secure-cookies", env = "QUILL_SECURE_COOKIES", default_value_t = false)]
    secure_cookies: bool,

    /// Let users change and recover their own passwords
    #[arg(
        long = "allow-password-change",
        env = "QUILL_ALLOW_PASSWORD_CHANGE",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    allow_password_change: bool,

    /// The address recovery e-mails are sent from
    #[arg(long = "mail-from", default_value = quill::config::DEFAULT_MAIL_FROM, env = "QUILL_MAIL_FROM")]
    mail_from: String,

    /// The absolute URL of the login page, used in recovery e-mails
    #[arg(long = "admin-url", default_value = quill::config::DEFAULT_ADMIN_URL, env = "QUILL_ADMIN_URL")]
    admin_url: String,

    /// Where users land after logging in
    #[arg(long = "home-path", default_value = quill::config::DEFAULT_HOME_PATH, env = "QUILL_HOME_PATH")]
    home_path: String,

    /// The super administrator to create if one does not already exist. It has to pick a new
    /// password at first login
    #[arg(long = "admin-user", default_value = "admin", env = "QUILL_ADMIN_USER")]
    admin_user: String,

    /// The password of the default super administrator. If the user already exists, it will not
    /// overwrite the current password
    #[arg(
        long = "admin-password",
        default_value = "changeme",
        env = "QUILL_ADMIN_PASSWORD",
        hide_env_values = true
    )]
    admin_password: String,

    /// The e-mail address of the default super administrator, needed for password recovery
    #[arg(long = "admin-email", env = "QUILL_ADMIN_EMAIL")]
    admin_email: Option<String>,

    /// The address and port to listen on for HTTP connections
    #[arg(
        short = 'l',
        default_value = "0.0.0.0:8080",
        env = "QUILL_LISTEN_ADDRESS"
    )]
    listen_address: String,

    /// Use json formatted logs
    #[arg(short = 'j', long = "json", env = "QUILL_LOG_FORMAT")]
    json_logs: bool,

    /// Keep users and sessions in memory and log e-mails instead of sending them. Nothing
    /// survives a restart, only use this for local development
    #[arg(long = "in-memory", env = "QUILL_IN_MEMORY", default_value_t = false)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());
    if args.json_logs {
        builder.json().init();
    } else {
        builder.pretty().init();
    }

    let config = GateConfig::new(&args.secret)?
        .with_secure_cookies(args.secure_cookies)
        .with_mail_from(args.mail_from.clone())?
        .with_admin_url(args.admin_url.clone())?
        .with_home_path(args.home_path.clone())?;
    let listener = TcpListener::bind(&args.listen_address)
        .await
        .with_context(|| format!("Unable to listen on {}", args.listen_address))?;

    if args.in_memory {
        warn!("Running with in memory storage, nothing will be persisted");
        return run(
            &args,
            config,
            MemoryStore::new(),
            MemorySessionStore::new(),
            LogMailer,
            listener,
        )
        .await;
    }

    let client = async_nats::connect(format!("{}:{}", args.nats_server, args.nats_port)).await?;
    info!("Successfully connected to NATS server");
    let js = if let Some(domain) = &args.js_domain {
        jetstream::with_domain(client.clone(), domain)
    } else {
        jetstream::new(client.clone())
    };

    let users = get_or_create_bucket(
        &js,
        Config {
            bucket: args.user_bucket.clone(),
            description: "Bucket for storing admin users".to_string(),
            history: 4,
            storage: StorageType::File,
            ..Default::default()
        },
    )
    .await?;
    let sessions = get_or_create_bucket(
        &js,
        Config {
            bucket: args.session_bucket.clone(),
            description: "Bucket for storing admin sessions".to_string(),
            history: 1,
            max_age: Duration::from_secs(args.session_ttl_hours * 60 * 60),
            storage: StorageType::File,
            ..Default::default()
        },
    )
    .await?;
    info!("Successfully connected to buckets");

    let store = CredStore::new(users).await?;
    run(
        &args,
        config,
        store,
        KvSessionStore::new(sessions),
        NatsMailer::new(client, args.mail_subject.clone()),
        listener,
    )
    .await
}

async fn get_or_create_bucket(
    js: &jetstream::Context,
    config: Config,
) -> anyhow::Result<jetstream::kv::Store> {
    match js.get_key_value(&config.bucket).await {
        Ok(b) => Ok(b),
        // There isn't an error that says whether or not the bucket exists, so we have to just
        // assume the error means it doesn't exist. Just to be sure we use create rather than get or
        // create so we don't swallow any connection errors
        Err(e) => {
            warn!(err = %e, bucket = %config.bucket, "KV bucket doesn't exist, creating it. It is highly recommended that you create your own bucket with proper replication settings for use in production");
            js.create_key_value(config)
                .await
                .context("Unable to create KV bucket")
        }
    }
}

async fn run<R, S, M>(
    args: &Args,
    config: GateConfig,
    store: R,
    sessions: S,
    mailer: M,
    listener: TcpListener,
) -> anyhow::Result<()>
where
    R: UserRepository + 'static,
    S: SessionStore + 'static,
    M: Mailer + 'static,
{
    let accounts = Accounts::new(store, args.allow_password_change)
        .with_recover_key_ttl(Duration::from_secs(args.recover_key_ttl_hours * 60 * 60));
    ensure_default_admin(&accounts, args).await?;

    let gate = Gate::new(accounts, mailer, config);
    HttpServer::new(gate, sessions).run(listener).await
}

async fn ensure_default_admin<R: UserRepository>(
    accounts: &Accounts<R>,
    args: &Args,
) -> anyhow::Result<()> {
    let result = accounts
        .add_user(NewUser {
            user_id: args.admin_user.clone(),
            password: args.admin_password.clone().into(),
            email: args.admin_email.clone(),
            super_admin: true,
            force_password_change: true,
        })
        .await;
    match result {
        Ok(()) => {
            info!(user_id = %args.admin_user, "Created default super administrator");
            Ok(())
        }
        Err(AuthError::UsernameTaken) => Ok(()),
        Err(err) => Err(anyhow::Error::from(err).context("Unable to create default admin user")),
    }
}
