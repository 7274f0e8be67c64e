//! # Draftsmith CLI (`draft`)
//!
//! The `draft` binary is the primary interface for Draftsmith. It creates
//! outlines from prompts, fills in sections one at a time, and exports the
//! result.
//!
//! ## Usage
//!
//! ```bash
//! draft --config ./config/draft.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `draft init` | Create the SQLite database and run schema migrations |
//! | `draft new "<prompt>"` | Generate an outline and save a new document |
//! | `draft generate <id>` | Generate every empty section (resumable) |
//! | `draft generate <id> --section <sid>` | Regenerate one section |
//! | `draft lucky` | Whole document from a random premise |
//! | `draft list` / `show <id>` / `delete <id>` | Inspect and manage documents |
//! | `draft export <id>` | Render as text or Markdown |
//! | `draft kb ...` | Manage knowledge bases |
//!
//! ## Examples
//!
//! ```bash
//! draft init
//! draft new "A field guide to urban foxes" --tone playful --words 900
//! draft generate 6f1c...        # Ctrl-C to stop, run again to resume
//! draft export 6f1c... --format markdown --output fox.md
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use draftsmith::config;
use draftsmith::doc_cmd::{self, NewOptions};
use draftsmith::export::{self, ExportFormat};
use draftsmith::kb_cmd;
use draftsmith::migrate;
use draftsmith::progress::ProgressMode;
use draftsmith::store::SqliteStore;

/// Draftsmith CLI: outline-then-expand document authoring with hosted
/// language models.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/draft.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "draft",
    about = "Draftsmith: outline-then-expand document authoring backed by hosted language models",
    version,
    long_about = "Draftsmith turns a prompt into a structured outline, then writes each section \
    in order with the earlier sections as context. Runs can be stopped at any time and resumed \
    later; completed sections are never lost."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/draft.toml`.
    #[arg(long, global = true, default_value = "./config/draft.toml")]
    config: PathBuf,

    /// Progress output on stderr: `off`, `human`, or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// This command is idempotent; running it multiple times is safe.
    Init,

    /// Generate an outline for a prompt and save it as a new document.
    ///
    /// Prints the new document id on the first line of stdout.
    New {
        /// What the document should be about.
        prompt: String,

        /// Writing tone (e.g. `neutral`, `playful`, `formal`).
        #[arg(long)]
        tone: Option<String>,

        /// Target length of the whole document in words.
        #[arg(long)]
        words: Option<u32>,

        /// Element to include; may be repeated.
        #[arg(long = "allow")]
        allow: Vec<String>,

        /// Element to avoid; may be repeated.
        #[arg(long = "deny")]
        deny: Vec<String>,

        /// Knowledge base (id or name) to draw context from.
        #[arg(long)]
        kb: Option<String>,

        /// Model override for this document.
        #[arg(long)]
        model: Option<String>,
    },

    /// Generate section content.
    ///
    /// Without `--section`, fills every empty section in order and skips
    /// those already written. Ctrl-C stops at the next chunk; completed
    /// sections are kept.
    Generate {
        /// Document id.
        id: String,

        /// Regenerate just this section id, replacing its content.
        #[arg(long)]
        section: Option<String>,
    },

    /// Generate a complete document from a random premise.
    Lucky,

    /// List documents, most recently updated first.
    List,

    /// Show a document's settings and per-section status.
    Show {
        /// Document id.
        id: String,
    },

    /// Export a document.
    Export {
        /// Document id.
        id: String,

        /// Output file path. Defaults to stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Output format: `text` or `markdown`.
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Delete a document.
    Delete {
        /// Document id.
        id: String,
    },

    /// Manage knowledge bases (hosted vector stores).
    Kb {
        #[command(subcommand)]
        action: KbAction,
    },
}

#[derive(Subcommand)]
enum KbAction {
    /// Create an empty knowledge base.
    Create { name: String },
    /// Upload a file and attach it to a knowledge base.
    Add {
        /// Knowledge base id or name.
        kb: String,
        file: PathBuf,
    },
    /// List knowledge bases.
    List,
    /// Search a knowledge base and print the matching excerpts.
    Search {
        /// Knowledge base id or name.
        kb: String,
        query: String,
    },
    /// Delete a knowledge base and its hosted store.
    Delete {
        /// Knowledge base id or name.
        kb: String,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let progress = match cli.progress.as_deref() {
        Some(s) => ProgressMode::parse(s).ok_or_else(|| {
            anyhow::anyhow!("Unknown progress mode: {}. Use off, human, or json.", s)
        })?,
        None => ProgressMode::default_for_tty(),
    };

    // `init` works without a config file, falling back to the defaults.
    let cfg = match cli.command {
        Commands::Init if !cli.config.exists() => config::Config::minimal(),
        _ => config::load_config(&cli.config)?,
    };

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::New {
            prompt,
            tone,
            words,
            allow,
            deny,
            kb,
            model,
        } => {
            let options = NewOptions {
                tone,
                words,
                allow,
                deny,
                knowledge_base: kb,
                model,
            };
            doc_cmd::run_new(&cfg, &prompt, &options, progress).await?;
        }
        Commands::Generate { id, section } => {
            doc_cmd::run_generate(&cfg, &id, section.as_deref(), progress).await?;
        }
        Commands::Lucky => {
            doc_cmd::run_lucky_cmd(&cfg, progress).await?;
        }
        Commands::List => {
            doc_cmd::run_list(&cfg).await?;
        }
        Commands::Show { id } => {
            doc_cmd::run_show(&cfg, &id).await?;
        }
        Commands::Export { id, output, format } => {
            let format = ExportFormat::parse(&format)?;
            let store = SqliteStore::open(&cfg).await?;
            let result = export::run_export(&store, &id, format, output.as_deref()).await;
            store.close().await;
            result?;
        }
        Commands::Delete { id } => {
            doc_cmd::run_delete(&cfg, &id).await?;
        }
        Commands::Kb { action } => match action {
            KbAction::Create { name } => kb_cmd::run_kb_create(&cfg, &name).await?,
            KbAction::Add { kb, file } => kb_cmd::run_kb_add(&cfg, &kb, &file).await?,
            KbAction::List => kb_cmd::run_kb_list(&cfg).await?,
            KbAction::Search { kb, query } => kb_cmd::run_kb_search(&cfg, &kb, &query).await?,
            KbAction::Delete { kb } => kb_cmd::run_kb_delete(&cfg, &kb).await?,
        },
    }

    Ok(())
}
