//! CLI entry point for the Testsmith backend.
//!
//! Results go to stdout (JSON or code); logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use testsmith_core::{
    app_data_dir, load_config, set_data_dir, status, Config, GenerationReport, Pipeline,
    TestCase, HEALTH_PROMPT,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "testsmith")]
#[command(about = "Testsmith: grounded test case and Selenium script generation")]
struct Cli {
    /// Data directory for uploads and the index (overrides config).
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status and whether a knowledge base exists.
    Status,
    /// Show where Testsmith stores its config and data.
    DataDir,
    /// Show or change persisted settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Upload a page plus support docs and rebuild the knowledge base.
    Ingest {
        /// The page under test.
        #[arg(long, value_name = "FILE")]
        html: PathBuf,
        /// Support document (txt, md, json, pdf). Repeatable.
        #[arg(long = "doc", value_name = "FILE")]
        docs: Vec<PathBuf>,
    },
    /// Generate test cases grounded in the knowledge base.
    Query {
        /// What to generate test cases for.
        text: String,
        /// Number of context chunks to retrieve.
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Generate a Selenium script for one test case.
    Script {
        /// JSON file with one test case, or a `{"test_cases": [...]}` document.
        #[arg(long, value_name = "FILE")]
        case: PathBuf,
        /// Which entry to use when the file holds several test cases.
        #[arg(long, default_value_t = 0)]
        pick: usize,
        /// Page markup to ground the script in (default: first uploaded page).
        #[arg(long, value_name = "FILE")]
        markup: Option<PathBuf>,
        /// Write the script here instead of stdout.
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },
    /// Check that the generation model answers.
    Ping,
}

#[derive(clap::Subcommand)]
enum ConfigAction {
    /// Print the effective config as JSON.
    Show,
    /// Persist the data directory.
    SetDataDir {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.to_string_lossy().into_owned());
    }

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("Testsmith backend");
            println!("  core: {}", status());
            let Some(p) = open(config) else {
                return ExitCode::FAILURE;
            };
            let s = p.status();
            println!("  data: {}", s.data_dir.display());
            if s.ready {
                let model = s.model.unwrap_or_default();
                println!("  index: {} chunk(s), embedded with {}", s.chunk_count, model);
            } else {
                println!("  index: not built (run `testsmith ingest`)");
            }
        }
        Commands::DataDir => match config.data_layout() {
            Ok(layout) => println!("{}", layout.root().display()),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        Commands::Config { action } => return run_config(action, &config),
        Commands::Ingest { html, docs } => {
            let Some(p) = open(config) else {
                return ExitCode::FAILURE;
            };
            match p.ingest(&html, &docs).await {
                Ok(report) => print_json(&report),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Query { text, k } => {
            let Some(p) = open(config) else {
                return ExitCode::FAILURE;
            };
            let generation = p.query(&text, k).await;
            print_json(&GenerationReport::from(&generation));
            if generation.parsed().is_none() {
                return ExitCode::FAILURE;
            }
        }
        Commands::Script {
            case,
            pick,
            markup,
            out,
        } => {
            let Some(p) = open(config) else {
                return ExitCode::FAILURE;
            };
            let test_case = match read_case(&case, pick) {
                Ok(tc) => tc,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let markup = match markup.map(std::fs::read_to_string).transpose() {
                Ok(m) => m,
                Err(e) => {
                    eprintln!("Error: could not read markup: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let report = p.synthesize_script(&test_case, markup.as_deref()).await;
            for w in &report.warnings {
                eprintln!("warning: {}", w);
            }
            match out {
                Some(path) => {
                    if let Err(e) = std::fs::write(&path, &report.code) {
                        eprintln!("Error: could not write {}: {}", path.display(), e);
                        return ExitCode::FAILURE;
                    }
                    println!("Wrote {}", path.display());
                }
                None => println!("{}", report.code),
            }
            if !report.success {
                return ExitCode::FAILURE;
            }
        }
        Commands::Ping => {
            let Some(p) = open(config) else {
                return ExitCode::FAILURE;
            };
            let reply = p.check_llm(HEALTH_PROMPT).await;
            println!("{}", reply.trim());
            if reply.starts_with("ERROR:") {
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}

fn open(config: Config) -> Option<Pipeline> {
    match Pipeline::with_ollama(config) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("Error: {}", e);
            None
        }
    }
}

fn run_config(action: ConfigAction, config: &Config) -> ExitCode {
    match action {
        ConfigAction::Show => {
            if let Some(dir) = app_data_dir() {
                eprintln!("# {}", dir.join("config.toml").display());
            }
            print_json(config);
        }
        ConfigAction::SetDataDir { path } => match set_data_dir(&path) {
            Ok(()) => println!("Data directory set to {}", path.display()),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
    }
    ExitCode::SUCCESS
}

/// Reads a single test case, or entry `pick` of a `{"test_cases": [...]}` file.
fn read_case(path: &Path, pick: usize) -> Result<TestCase, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let value: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| format!("{}: {}", path.display(), e))?;
    let entry = match value.get("test_cases").and_then(|v| v.as_array()) {
        Some(cases) => cases
            .get(pick)
            .cloned()
            .ok_or_else(|| format!("no test case at index {} ({} available)", pick, cases.len()))?,
        None => value,
    };
    serde_json::from_value(entry).map_err(|e| format!("not a test case: {}", e))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Error: {}", e),
    }
}
