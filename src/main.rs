use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use referee::condition::Expression;
use referee::trace::TraceSink;
use referee::{
    ArgumentStore, ClientError, Config, ContextBuilder, Level, Outcome, ProtocolClient,
    RefereeResult, Session,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "referee")]
#[command(author, version, about = "LLM referee for deduction games")]
struct Args {
    /// Log level for stderr output (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<tracing::Level>,

    /// Config file layered above the global and local config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the messages that would be sent for a statement
    Prompt {
        /// Level file
        #[arg(short, long)]
        level: PathBuf,

        /// Active phase id
        #[arg(short, long)]
        phase: String,

        /// Player statement
        #[arg(default_value = "")]
        input: String,

        /// Show the topic-discovery prompt instead
        #[arg(long)]
        discovery: bool,
    },

    /// Judge a player statement and apply the result
    Judge {
        /// Level file
        #[arg(short, long)]
        level: PathBuf,

        /// Active phase id
        #[arg(short, long)]
        phase: String,

        /// Argument already proven (repeatable)
        #[arg(long = "proven")]
        proven: Vec<String>,

        /// Player statement
        input: String,

        /// Write each exchange to <dir>/<timestamp>.jsonl
        #[arg(long)]
        trace_dir: Option<PathBuf>,

        /// Log requests and raw responses
        #[arg(short, long)]
        verbose: bool,
    },

    /// Find the topics a statement touches
    Discover {
        /// Level file
        #[arg(short, long)]
        level: PathBuf,

        /// Active phase id
        #[arg(short, long)]
        phase: String,

        /// Player statement
        input: String,

        /// Write each exchange to <dir>/<timestamp>.jsonl
        #[arg(long)]
        trace_dir: Option<PathBuf>,
    },

    /// Evaluate a prerequisite expression
    Eval {
        /// Expression JSON, e.g. '{"or_1":{"any_of":2,"a":true,"b":true}}'
        expression: String,

        /// Argument statuses as a JSON object of booleans
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(args.log_level);

    if let Err(e) = run(args) {
        eprintln!("{} {:#}", "Error:".red(), e);
        std::process::exit(1);
    }
}

fn init_tracing(level: Option<tracing::Level>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Prompt {
            level,
            phase,
            input,
            discovery,
        } => {
            let level = Level::load(&level)?;
            let builder = ContextBuilder::new(&level.nodes, &level.entities);
            let prompt = if discovery {
                match builder.discovery_prompt(&phase, &input) {
                    Some(prompt) => prompt,
                    None => {
                        println!("{} no discovery candidates in {}", "Note:".yellow(), phase);
                        return Ok(());
                    }
                }
            } else {
                builder.referee_prompt(&phase, &input)
            };
            println!("{}", "[system]".cyan().bold());
            println!("{}", prompt.system_message());
            println!("{}", "[user]".cyan().bold());
            println!("{}", prompt.user_input);
            Ok(())
        }

        Command::Judge {
            level,
            phase,
            proven,
            input,
            trace_dir,
            verbose,
        } => {
            let level = Level::load(&level)?;
            warn_unknown_phase(&level, &phase);
            let mut config = load_config(args.config.as_deref())?;
            if verbose {
                config.client.verbose = Some(true);
            }
            let cutoff = config.progress.cutoff();
            let client = build_client(trace_dir.as_deref())?;
            let mut session =
                Session::with_store(client, config, level, ArgumentStore::with_proven(proven));
            session
                .dispatcher_mut()
                .subscribe("console", move |result: &RefereeResult| {
                    print_judgment(result, cutoff);
                    Ok(())
                });

            let runtime = runtime()?;
            let outcome = runtime.block_on(async {
                let cancel = CancellationToken::new();
                let trigger = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        trigger.cancel();
                    }
                });
                session.judge(&phase, &input, &cancel).await
            });

            match outcome.map_err(client_failure)? {
                Outcome::Cancelled => {
                    println!("{} judgment cancelled", "Note:".yellow());
                }
                Outcome::Judged { report, .. } => {
                    for failure in &report.failures {
                        eprintln!(
                            "{} subscriber '{}' failed: {}",
                            "Warning:".yellow(),
                            failure.name,
                            failure.message
                        );
                    }
                    if let Some(progress) = session.progress().last_report() {
                        for id in &progress.proven {
                            println!("{} {}", "Proven".green(), id);
                        }
                        for id in &progress.blocked {
                            println!("{} {} (prerequisites not met)", "Blocked".yellow(), id);
                        }
                        for id in &progress.unknown {
                            println!("{} {} (not in level)", "Unknown".red(), id);
                        }
                        for id in &progress.completed_phases {
                            println!("{} {}", "Phase completed".green().bold(), id);
                        }
                        for id in &progress.unlocked_phases {
                            println!("{} {}", "Phase unlocked".cyan().bold(), id);
                        }
                    }
                }
            }
            Ok(())
        }

        Command::Discover {
            level,
            phase,
            input,
            trace_dir,
        } => {
            let level = Level::load(&level)?;
            warn_unknown_phase(&level, &phase);
            let config = load_config(args.config.as_deref())?;
            let client = build_client(trace_dir.as_deref())?;
            let session = Session::new(client, config, level);

            let found = runtime()?
                .block_on(session.discover(&phase, &input))
                .map_err(client_failure)?;
            match found {
                None => println!("{} no discovery candidates in {}", "Note:".yellow(), phase),
                Some(found) if found.discovered_ids.is_empty() => {
                    println!("{}", "No topics discovered".dimmed())
                }
                Some(found) => {
                    for id in found.discovered_ids {
                        println!("{} {}", "Discovered".green(), id);
                    }
                }
            }
            Ok(())
        }

        Command::Eval { expression, status } => {
            let lookup = parse_status(status.as_deref())?;
            let root = Expression::parse(&expression).context("cannot evaluate expression")?;
            for problem in root.diagnostics() {
                eprintln!("{} {}", "Warning:".yellow(), problem);
            }
            if root.evaluate(&lookup) {
                println!("{}", "PASS".green().bold());
            } else {
                println!("{}", "FAIL".red().bold());
            }
            Ok(())
        }

        Command::Config => {
            let config = load_config(args.config.as_deref())?;
            let shown = toml::to_string_pretty(&config.redacted())
                .context("failed to render configuration")?;
            if shown.trim().is_empty() {
                println!("{}", "No configuration set; using defaults".dimmed());
            } else {
                print!("{}", shown);
            }
            println!(
                "{} model={} temperature={} json_mode={} cutoff={}",
                "Effective:".cyan(),
                config.client.model(),
                config.client.temperature(),
                config.client.json_mode(),
                config.progress.cutoff()
            );
            Ok(())
        }

        Command::Completions { shell } => {
            let mut command = Args::command();
            clap_complete::generate(shell, &mut command, "referee", &mut io::stdout());
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    Ok(Config::load_with(explicit)?)
}

fn build_client(trace_dir: Option<&Path>) -> Result<ProtocolClient> {
    let client = ProtocolClient::new();
    Ok(match trace_dir {
        Some(dir) => client.with_trace(Arc::new(TraceSink::create(dir)?)),
        None => client,
    })
}

fn warn_unknown_phase(level: &Level, phase: &str) {
    if level.phase(phase).is_none() {
        eprintln!(
            "{} phase '{}' is not defined in the level; only universal nodes apply",
            "Warning:".yellow(),
            phase
        );
    }
}

/// Print the neutral line players see, keep the detail for stderr.
fn client_failure(e: ClientError) -> anyhow::Error {
    println!("{}", e.user_message().dimmed());
    if let Some(raw) = e.raw_payload() {
        tracing::debug!("Failed payload: {}", raw);
    }
    anyhow::Error::new(e)
}

fn parse_status(status: Option<&str>) -> Result<BTreeMap<String, bool>> {
    let Some(text) = status else {
        return Ok(BTreeMap::new());
    };
    let value: Value = serde_json::from_str(text).context("--status must be JSON")?;
    let Value::Object(entries) = value else {
        bail!("--status must be a JSON object");
    };
    Ok(entries
        .into_iter()
        .filter_map(|(id, v)| v.as_bool().map(|b| (id, b)))
        .collect())
}

fn print_judgment(result: &RefereeResult, cutoff: f64) {
    println!("{} {}", "Reasoning:".cyan(), result.reasoning);
    for (id, confidence) in &result.node_confidence {
        let shown = format!("{:>5}", confidence.to_string());
        let shown = if confidence.value() >= cutoff {
            shown.green()
        } else {
            shown.dimmed()
        };
        println!("  {} {}", shown, id);
    }
    for (key, keywords) in &result.partial_match {
        println!("  {} {}: {}", "~".yellow(), key, keywords.join(", "));
    }
    if let Some(opinion) = &result.user_opinion {
        println!("{} {}", "Player claims:".cyan(), opinion);
    }
}
