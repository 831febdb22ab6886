use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Context;
use async_nats::ConnectOptions;
use clap::{Parser, Subcommand};
use quill::accounts::{Accounts, NewUser};
use quill::storage::CredStore;
use quill::SecureString;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quill admin user CLI", long_about = None)]
struct Cli {
    /// NATS server host
    #[arg(
        long = "nats-server",
        default_value = "127.0.0.1",
        env = "QUILL_NATS_SERVER"
    )]
    nats_server: String,

    /// NATS server port
    #[arg(long = "nats-port", default_value_t = 4222, env = "QUILL_NATS_PORT")]
    nats_port: u16,

    /// NATS credentials file (mutually exclusive with username/password)
    #[arg(long = "creds", env = "QUILL_NATS_CREDS", conflicts_with_all = ["nats_username", "nats_password"])]
    creds: Option<PathBuf>,

    /// NATS username (requires --nats-password)
    #[arg(
        long = "nats-username",
        env = "QUILL_NATS_USER",
        requires = "nats_password",
        conflicts_with = "creds"
    )]
    nats_username: Option<String>,

    /// NATS password (requires --nats-username)
    #[arg(
        long = "nats-password",
        env = "QUILL_NATS_PASSWORD",
        requires = "nats_username",
        conflicts_with = "creds"
    )]
    nats_password: Option<String>,

    /// Optional CA cert for NATS TLS
    #[arg(long = "nats-ca-cert", env = "QUILL_NATS_CA_CERT")]
    nats_ca_cert: Option<PathBuf>,

    /// Optional JetStream domain
    #[arg(long = "js-domain", env = "QUILL_JS_DOMAIN")]
    js_domain: Option<String>,

    /// The KeyValue bucket users are stored in
    #[arg(long = "user-bucket", default_value = "quill_users", env = "QUILL_USER_BUCKET")]
    user_bucket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a user
    AddUser {
        /// Username
        #[arg(long)]
        username: String,
        /// Password
        #[arg(long)]
        password: String,
        /// E-mail address, needed for password recovery
        #[arg(long)]
        email: Option<String>,
        /// Make the user a super administrator
        #[arg(long = "super-admin", default_value_t = false)]
        super_admin: bool,
        /// Force password change on first login
        #[arg(long = "force-reset", default_value_t = false)]
        force_reset: bool,
    },
    /// Give a user permissions on a blog
    GrantBlog {
        #[arg(long)]
        username: String,
        #[arg(long)]
        blog: String,
        /// Permissions to grant (can repeat)
        #[arg(long = "permission", default_value = "usage")]
        permissions: Vec<String>,
    },
    /// Remove all of a user's permissions on a blog
    RevokeBlog {
        #[arg(long)]
        username: String,
        #[arg(long)]
        blog: String,
    },
    /// Make a user pick a new password at their next login
    ForceReset {
        #[arg(long)]
        username: String,
    },
    /// Delete a user
    Delete {
        #[arg(long)]
        username: String,
    },
    /// List all users
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let nc = get_nats_client(
        format!("{}:{}", cli.nats_server, cli.nats_port),
        cli.creds,
        cli.nats_username,
        cli.nats_password,
        cli.nats_ca_cert,
    )
    .await?;
    let js = match cli.js_domain {
        Some(domain) => async_nats::jetstream::with_domain(nc, domain),
        None => async_nats::jetstream::new(nc),
    };
    let bucket = js
        .get_key_value(&cli.user_bucket)
        .await
        .context("Unable to open user bucket. Has the server been started?")?;
    let accounts = Accounts::new(CredStore::new(bucket).await?, true);

    match cli.command {
        Commands::AddUser {
            username,
            password,
            email,
            super_admin,
            force_reset,
        } => {
            accounts
                .add_user(NewUser {
                    user_id: username.clone(),
                    password: SecureString::from(password),
                    email,
                    super_admin,
                    force_password_change: force_reset,
                })
                .await
                .context("failed to add user")?;
            println!("User {} added", username);
        }
        Commands::GrantBlog {
            username,
            blog,
            permissions,
        } => {
            let permissions: BTreeSet<String> = permissions.into_iter().collect();
            let granted = accounts
                .grant_blog(&username, &blog, permissions)
                .await
                .context("failed to grant blog permissions")?;
            println!(
                "User {} now holds {} on {}",
                username,
                granted.into_iter().collect::<Vec<_>>().join(", "),
                blog
            );
        }
        Commands::RevokeBlog { username, blog } => {
            accounts
                .revoke_blog(&username, &blog)
                .await
                .context("failed to revoke blog permissions")?;
            println!("User {} no longer has access to {}", username, blog);
        }
        Commands::ForceReset { username } => {
            accounts
                .require_password_change(&username)
                .await
                .context("failed to flag user")?;
            println!("User {} must change their password at next login", username);
        }
        Commands::Delete { username } => {
            accounts
                .delete_user(&username)
                .await
                .context("failed to delete user")?;
            println!("User {} deleted", username);
        }
        Commands::List => {
            for user in accounts.list_users().await.context("failed to list users")? {
                println!("{user}");
            }
        }
    }

    Ok(())
}

async fn get_nats_client(
    nats_addr: String,
    creds: Option<PathBuf>,
    username: Option<String>,
    password: Option<String>,
    ca_cert: Option<PathBuf>,
) -> anyhow::Result<async_nats::Client> {
    let mut opts = ConnectOptions::new();
    if let Some(cert) = ca_cert {
        opts = opts.add_root_certificates(cert)
    }

    if let Some(creds_file) = creds {
        opts = opts
            .credentials_file(creds_file)
            .await
            .context("Unable to open credentials file")?;
    } else if let (Some(user), Some(pass)) = (username, password) {
        opts = opts.user_and_password(user, pass);
    }

    opts.connect(nats_addr)
        .await
        .context("Unable to connect to NATS")
}
