//! # Knowledge Hub CLI (`khub`)
//!
//! Administers the knowledge hub database and runs the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! khub --config ./config/khub.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `khub init` | Create the SQLite database and run schema migrations |
//! | `khub serve` | Start the REST server |
//! | `khub user add <email>` | Create a user and print its id |
//! | `khub token <user-id>` | Print a signed session token |
//! | `khub conversation add --user <id>` | Create a conversation |
//! | `khub file add --user <id> <filename>` | Create a file record |
//! | `khub kb <action>` | Manage knowledge bases and their members |
//! | `khub project <action>` | Create and inspect projects |
//!
//! ## Examples
//!
//! ```bash
//! khub init
//! USER=$(khub user add ada@example.com --name Ada)
//! khub kb create --user "$USER" --name "Research" --slug research
//! khub kb conversations research --user "$USER" --limit 10
//! khub serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use knowledge_hub::commands::{self, UpdateField};
use knowledge_hub::knowledge_hub_core::models::MemberKind;
use knowledge_hub::{config, logging, migrate, server};

/// Knowledge Hub: user-owned knowledge bases that group conversations and files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/khub.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "khub", version, about = "Knowledge bases and projects over a REST API")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/khub.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the REST server on `[server].bind`.
    Serve,

    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Print a session token for a user.
    Token {
        /// User id (24 hex characters).
        user: String,

        /// Lifetime in seconds; defaults to `auth.token_ttl_secs`.
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Manage conversations.
    Conversation {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Manage file records.
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Manage knowledge bases.
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user and print its id.
    Add {
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConversationAction {
    /// Create a conversation owned by a user.
    Add {
        #[arg(long)]
        user: String,
        #[arg(long)]
        title: Option<String>,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// Create a file record owned by a user.
    Add {
        #[arg(long)]
        user: String,
        filename: String,
        #[arg(long, default_value_t = 0)]
        bytes: i64,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// List a user's knowledge bases with conversation previews.
    List {
        #[arg(long)]
        user: String,
    },
    /// Create a knowledge base.
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        slug: Option<String>,
    },
    /// Rename a knowledge base.
    Rename { id: String, name: String },
    /// Set a knowledge base's description.
    Describe { id: String, description: String },
    /// Delete a knowledge base.
    Delete { id: String },
    AddConversation { kb: String, conversation: String },
    RemoveConversation { kb: String, conversation: String },
    AddFile { kb: String, file: String },
    RemoveFile { kb: String, file: String },
    /// Page through a knowledge base's conversations.
    Conversations {
        /// Knowledge base id or slug.
        id_or_slug: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long)]
        limit: Option<i64>,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// Create a project.
    Create {
        #[arg(long)]
        name: String,
        /// Agent id; repeatable.
        #[arg(long = "agent")]
        agents: Vec<String>,
    },
    /// Print a project by id.
    Get { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init_tracing(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::User {
            action: UserAction::Add { email, name },
        } => {
            commands::add_user(&cfg, &email, name.as_deref()).await?;
        }
        Commands::Token { user, ttl_secs } => {
            commands::issue_token(&cfg, &user, ttl_secs)?;
        }
        Commands::Conversation {
            action: ConversationAction::Add { user, title },
        } => {
            commands::add_conversation_record(&cfg, &user, title).await?;
        }
        Commands::File {
            action:
                FileAction::Add {
                    user,
                    filename,
                    bytes,
                },
        } => {
            commands::add_file_record(&cfg, &user, &filename, bytes).await?;
        }
        Commands::Kb { action } => match action {
            KbAction::List { user } => {
                commands::list_knowledge_bases(&cfg, &user).await?;
            }
            KbAction::Create {
                user,
                name,
                description,
                slug,
            } => {
                commands::create_knowledge_base(&cfg, &user, &name, description, slug).await?;
            }
            KbAction::Rename { id, name } => {
                commands::update_knowledge_base(&cfg, &id, UpdateField::Name, &name).await?;
            }
            KbAction::Describe { id, description } => {
                commands::update_knowledge_base(&cfg, &id, UpdateField::Description, &description)
                    .await?;
            }
            KbAction::Delete { id } => {
                commands::delete_knowledge_base(&cfg, &id).await?;
            }
            KbAction::AddConversation { kb, conversation } => {
                commands::change_membership(&cfg, &kb, MemberKind::Conversation, &conversation, true)
                    .await?;
            }
            KbAction::RemoveConversation { kb, conversation } => {
                commands::change_membership(
                    &cfg,
                    &kb,
                    MemberKind::Conversation,
                    &conversation,
                    false,
                )
                .await?;
            }
            KbAction::AddFile { kb, file } => {
                commands::change_membership(&cfg, &kb, MemberKind::File, &file, true).await?;
            }
            KbAction::RemoveFile { kb, file } => {
                commands::change_membership(&cfg, &kb, MemberKind::File, &file, false).await?;
            }
            KbAction::Conversations {
                id_or_slug,
                user,
                cursor,
                limit,
            } => {
                commands::list_conversations(&cfg, &id_or_slug, &user, cursor, limit).await?;
            }
        },
        Commands::Project { action } => match action {
            ProjectAction::Create { name, agents } => {
                commands::create_project(&cfg, &name, agents).await?;
            }
            ProjectAction::Get { id } => {
                commands::get_project(&cfg, &id).await?;
            }
        },
    }

    Ok(())
}
