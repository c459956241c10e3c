//! quill - replay and inspect persisted agent transcripts

mod commands;
mod config;
mod utils;

use clap::{Parser, Subcommand};
use commands::{ListCommand, ReplayCommand, ShowCommand};
use quill_transcript::{EntryCache, EntryStore, FileStore, TranscriptRepository};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// quill - streaming transcript assembly and storage
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Transcript directory (overrides the config file)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fold a JSONL stream event recording into a stored transcript
    Replay {
        /// File with one stream event per line
        events: PathBuf,

        /// Transcript id to merge into
        #[arg(long)]
        id: String,

        /// User prompt that started the turn
        #[arg(short, long)]
        prompt: Option<String>,

        /// Turn id (derived from the prompt and recording when omitted)
        #[arg(long)]
        turn: Option<String>,
    },

    /// Print a stored transcript as JSON
    Show {
        /// Transcript id
        id: String,
    },

    /// List stored transcripts
    List,

    /// Initialize config file
    InitConfig,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("quill=debug,quill_model=debug,quill_transcript=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Open the file store and the cached repository in front of it
fn open_repository(
    cfg: &config::Config,
    store_dir: Option<PathBuf>,
) -> anyhow::Result<(Arc<FileStore>, TranscriptRepository)> {
    let store_dir = cfg.store_dir(store_dir);
    tracing::debug!("using transcript directory {}", store_dir.display());

    let store = Arc::new(FileStore::new(&store_dir)?);
    let cache = Arc::new(EntryCache::new(cfg.cache.clone()));
    let repo = TranscriptRepository::new(cache, Arc::clone(&store) as Arc<dyn EntryStore>);
    Ok((store, repo))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = config::Config::load();

    match args.command {
        Command::InitConfig => match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        },
        Command::Replay {
            events,
            id,
            prompt,
            turn,
        } => {
            let (_, repo) = open_repository(&cfg, args.store_dir)?;
            let summary =
                ReplayCommand::execute(&repo, &id, &events, prompt.as_deref(), turn.as_deref())
                    .await?;
            println!(
                "Replayed {} events into {} messages ({} assistant, {} tool)",
                summary.events,
                summary.turn_messages,
                summary.assistant_messages,
                summary.tool_messages
            );
            println!(
                "Transcript {} now holds {} raw messages, {} response entries",
                id, summary.stored_raw_messages, summary.stored_response_messages
            );
        }
        Command::Show { id } => {
            let (_, repo) = open_repository(&cfg, args.store_dir)?;
            match ShowCommand::execute(&repo, &id).await? {
                Some(json) => println!("{}", json),
                None => {
                    eprintln!("Transcript not found: {}", id);
                    std::process::exit(1);
                }
            }
        }
        Command::List => {
            let (store, _) = open_repository(&cfg, args.store_dir)?;
            let infos = ListCommand::execute(&store).await?;
            if infos.is_empty() {
                println!("No stored transcripts found.");
                println!("Transcripts are stored in: {}", store.dir().display());
            } else {
                println!("{:<38} {:<6} Preview", "ID", "Msgs");
                println!("{}", "-".repeat(90));
                for info in infos {
                    println!("{:<38} {:<6} {}", info.id, info.message_count, info.preview);
                }
            }
        }
    }

    Ok(())
}
