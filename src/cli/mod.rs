use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tlweave")]
#[command(author, version, about = "Batch LLM translation for game scripts and text files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a file or directory with the configured LLM backend
    Translate(TranslateArgs),

    /// Show progress of a cached translation run
    Status(StatusArgs),

    /// Send a probe request with every configured API key
    TestApi(TestApiArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Initialize configuration file with defaults
    Init {
        /// Overwrite existing config
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., translation.token_limit)
        key: String,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// Show config file path
    Path,

    /// Edit config file with default editor
    Edit,
}

#[derive(Parser, Debug)]
pub struct TranslateArgs {
    /// Input file or directory
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output directory (translated files and cache)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Resume from the cache in the output directory
    #[arg(long = "continue", default_value_t = false)]
    pub resume: bool,

    /// Backend (openai, anthropic, google, local)
    #[arg(long)]
    pub backend: Option<String>,

    /// Target language (e.g., zh, en)
    #[arg(short, long)]
    pub lang: Option<String>,

    /// Source language (ja, ko, zh, en, ...)
    #[arg(long)]
    pub source_lang: Option<String>,

    /// Concurrent requests (0 = ask the backend)
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Token budget per batch in the first round
    #[arg(long)]
    pub token_limit: Option<usize>,

    /// Maximum number of rounds
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Glossary file (`src = dst | info` per line)
    #[arg(short, long)]
    pub glossary: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output directory of a previous run
    #[arg(required = true)]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct TestApiArgs {
    /// Backend to test instead of the configured one
    #[arg(long)]
    pub backend: Option<String>,
}
