//! # messenger
//!
//! Command-line client for the conversation store.
//!
//! Runs the synchronizer against a local SQLite document store and a
//! filesystem blob store. The signed-in user is kept in `session.json` in
//! the data directory and handed to every operation explicitly.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use messenger_client::{
    FanOut, Media, Session, SessionCache, SyncError, Synchronizer,
};
use messenger_shared::{ChatUser, IdentityKey, Message, MessageContent, MessageId};
use messenger_store::{Database, FsBlobStore};

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "messenger")]
#[command(about = "Two-party conversations over a shared document store")]
struct Cli {
    /// Directory for the database, blobs and session file
    /// (`MESSENGER_DB_PATH` and `MESSENGER_BLOB_PATH` still take precedence)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// How multi-document writes are issued: atomic or rmw
    #[arg(long)]
    fan_out: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and list it in the user directory
    Register {
        email: String,
        first_name: String,
        last_name: String,
        /// Profile picture to upload
        #[arg(long)]
        avatar: Option<PathBuf>,
    },

    /// Sign in as an existing user
    Login { email: String },

    /// Forget the signed-in user
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List registered users
    Users {
        /// Only names starting with this
        #[arg(long)]
        search: Option<String>,
    },

    /// List the signed-in user's conversations
    Conversations,

    /// Send a text message, starting the conversation if needed
    Send { to: String, text: String },

    /// Send a photo message
    SendPhoto { to: String, file: PathBuf },

    /// Show the messages exchanged with a user
    Messages { with: String },

    /// Print the profile picture URL of a user
    Avatar { email: String },

    /// Follow the conversation list, or one conversation, until Ctrl+C
    Watch {
        /// Follow the messages exchanged with this user instead
        with: Option<String>,
    },

    /// Repair the latest-message previews of a conversation from its log
    Reconcile { with: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,messenger_cli=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 2. Load configuration, flags over environment
    // -----------------------------------------------------------------------
    let mut config = CliConfig::from_env(cli.data_dir);
    if let Some(raw) = cli.fan_out {
        config.fan_out = raw.parse::<FanOut>().map_err(anyhow::Error::msg)?;
    }
    tracing::debug!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open stores
    // -----------------------------------------------------------------------
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let docs = Arc::new(Database::open_at(&config.db_path)?);
    info!(path = ?docs.path(), fan_out = ?config.fan_out, "Opened document store");
    let blobs = Arc::new(
        FsBlobStore::new(
            config.blob_path.clone(),
            config.blob_base_url.clone(),
            config.max_blob_size,
        )
        .await?,
    );

    let sync = Synchronizer::new(docs, config.fan_out);
    let media = Media::new(blobs);
    let sessions = SessionCache::load(&config.session_file())?;

    // -----------------------------------------------------------------------
    // 4. Run the command
    // -----------------------------------------------------------------------
    match cli.command {
        Commands::Register {
            email,
            first_name,
            last_name,
            avatar,
        } => {
            if sync.users().user_exists(&email).await? {
                bail!("{email} is already registered");
            }
            let user = ChatUser {
                first_name,
                last_name,
                email,
            };
            sync.users().insert_user(&user).await?;
            if let Some(file) = avatar {
                let data = tokio::fs::read(&file)
                    .await
                    .with_context(|| format!("reading {}", file.display()))?;
                let url = media.upload_profile_picture(&user.identity(), &data).await?;
                println!("profile picture: {url}");
            }
            sessions.sign_in(Session::new(&user.email, &user.full_name()))?;
            println!("registered and signed in as {}", user.full_name());
        }

        Commands::Login { email } => {
            let identity = IdentityKey::from_email(&email);
            let profile = match sync.users().profile(&identity).await {
                Ok(profile) => profile,
                Err(SyncError::NotFound(_)) => bail!("no user registered as {email}"),
                Err(e) => return Err(e.into()),
            };
            sessions.sign_in(Session::new(&email, &profile.full_name()))?;
            println!("signed in as {}", profile.full_name());
        }

        Commands::Logout => {
            sessions.sign_out()?;
            println!("signed out");
        }

        Commands::Whoami => {
            let session = sessions.current()?;
            println!("{} <{}> ({})", session.display_name, session.email, session.identity);
        }

        Commands::Users { search } => {
            let me = sessions.current().ok().map(|s| s.identity);
            let entries = match search {
                Some(term) => sync.users().search(&term, me.as_ref()).await?,
                None => sync.users().directory().await?,
            };
            for entry in entries {
                println!("{:<30} {}", entry.name, entry.identity);
            }
        }

        Commands::Conversations => {
            let session = sessions.current()?;
            match sync.list_conversations(&session.identity).await {
                Ok(summaries) => {
                    for s in summaries {
                        let unread = if s.latest_message.is_read { ' ' } else { '*' };
                        println!(
                            "{unread} {:<24} {}  {}",
                            s.display_name,
                            s.latest_message.sent_at.format("%Y-%m-%d %H:%M"),
                            s.latest_message.text
                        );
                    }
                }
                Err(SyncError::NotFound(_)) => println!("no conversations yet"),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Send { to, text } => {
            let session = sessions.current()?;
            let counterpart = IdentityKey::from_email(&to);
            let id = MessageId::generate(&counterpart, &session.identity, Utc::now());
            let message = Message::new(id, session.sender(), MessageContent::Text(text));
            deliver(&sync, &session, &counterpart, &message).await?;
        }

        Commands::SendPhoto { to, file } => {
            let session = sessions.current()?;
            let counterpart = IdentityKey::from_email(&to);
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;

            let id = MessageId::generate(&counterpart, &session.identity, Utc::now());
            let url = media.upload_message_photo(&id, &data).await?;
            let message = Message::new(id, session.sender(), MessageContent::Photo(url));
            deliver(&sync, &session, &counterpart, &message).await?;
        }

        Commands::Messages { with } => {
            let session = sessions.current()?;
            let counterpart = IdentityKey::from_email(&with);
            let Some(id) = sync.find_conversation_with(&session, &counterpart).await? else {
                bail!("no conversation with {with}");
            };
            for m in sync.list_messages(&id).await? {
                print_message(&m);
            }
        }

        Commands::Avatar { email } => {
            let url = media
                .profile_picture_url(&IdentityKey::from_email(&email))
                .await?;
            println!("{url}");
        }

        Commands::Watch { with } => {
            let session = sessions.current()?;
            match with {
                None => {
                    let mut updates = Box::pin(sync.watch_conversations(&session.identity));
                    loop {
                        tokio::select! {
                            next = updates.next() => match next {
                                Some(Ok(summaries)) => {
                                    println!("-- {} conversation(s)", summaries.len());
                                    for s in summaries {
                                        println!("   {:<24} {}", s.display_name, s.latest_message.text);
                                    }
                                }
                                Some(Err(SyncError::NotFound(_))) => println!("-- no conversations yet"),
                                Some(Err(e)) => return Err(e.into()),
                                None => break,
                            },
                            _ = tokio::signal::ctrl_c() => break,
                        }
                    }
                }
                Some(with) => {
                    let counterpart = IdentityKey::from_email(&with);
                    let Some(id) = sync.find_conversation_with(&session, &counterpart).await?
                    else {
                        bail!("no conversation with {with}");
                    };
                    let mut updates = Box::pin(sync.watch_messages(&id));
                    let mut shown = 0;
                    loop {
                        tokio::select! {
                            next = updates.next() => match next {
                                Some(Ok(messages)) => {
                                    for m in messages.iter().skip(shown) {
                                        print_message(m);
                                    }
                                    shown = messages.len();
                                }
                                Some(Err(e)) => return Err(e.into()),
                                None => break,
                            },
                            _ = tokio::signal::ctrl_c() => break,
                        }
                    }
                }
            }
            info!("Stopped watching");
        }

        Commands::Reconcile { with } => {
            let session = sessions.current()?;
            let counterpart = IdentityKey::from_email(&with);
            let Some(id) = sync.find_conversation_with(&session, &counterpart).await? else {
                bail!("no conversation with {with}");
            };
            let display_name = sync.users().profile(&counterpart).await?.full_name();
            if sync.reconcile(&session, &id, &counterpart, &display_name).await? {
                println!("repaired {id}");
            } else {
                println!("{id} is consistent");
            }
        }
    }

    Ok(())
}

/// Append to the existing conversation with `counterpart`, or start one.
async fn deliver(
    sync: &Synchronizer,
    session: &Session,
    counterpart: &IdentityKey,
    message: &Message,
) -> anyhow::Result<()> {
    let display_name = match sync.users().profile(counterpart).await {
        Ok(profile) => profile.full_name(),
        Err(SyncError::NotFound(_)) => bail!("no user registered as {counterpart}"),
        Err(e) => return Err(e.into()),
    };

    match sync.find_conversation_with(session, counterpart).await? {
        Some(id) => {
            sync.send_message(session, &id, counterpart, &display_name, message)
                .await?;
            println!("sent to {display_name} in {id}");
        }
        None => {
            let id = sync
                .create_conversation(session, counterpart, message, &display_name)
                .await?;
            println!("started {id} with {display_name}");
        }
    }
    Ok(())
}

fn print_message(m: &Message) {
    println!(
        "[{}] {}: {}",
        m.sent_at.format("%Y-%m-%d %H:%M:%S"),
        m.sender.display_name,
        m.content.raw()
    );
}
