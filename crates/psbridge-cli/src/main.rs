use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use psbridge_core::{Credentials, Record, Value};
use psbridge_pool::SessionPool;
use psbridge_shell::{CommandOutput, ShellError};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "psbridge", about = "Run commands against a remote management shell")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "psbridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one command through a pooled session and print the result
    Run {
        /// Output layout override ("text" or "typed")
        #[arg(long)]
        layout: Option<String>,

        /// Credential field override, repeatable (name=value)
        #[arg(long = "cred", value_name = "NAME=VALUE")]
        creds: Vec<String>,

        /// How to render parsed records
        #[arg(long, value_enum, default_value = "json")]
        output: OutputFormat,

        /// The command line to send to the remote shell
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Validate the configuration file
    CheckConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Ordered pretty-printed JSON
    Json,
    /// Plain field listing
    Text,
}

fn main() -> anyhow::Result<()> {
    // Respects RUST_LOG, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            layout,
            creds,
            output,
            command,
        } => run(config, layout, creds, output, command),
        Commands::CheckConfig => check_config(&config),
    }
}

fn run(
    config: Config,
    layout: Option<String>,
    creds: Vec<String>,
    output: OutputFormat,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let mut builder = config.session_builder()?;
    if let Some(layout) = layout {
        builder = builder.with_layout(layout.parse().map_err(anyhow::Error::msg)?);
    }
    let credentials = merge_credentials(config.credentials(), &creds)?;
    let pool = SessionPool::new(config.pool.clone(), builder);

    tracing::debug!(command = %command.join(" "), "executing remote command");
    let mut session = pool.acquire(&credentials)?;
    let result = session.execute(&command.join(" "));
    pool.release(session);
    pool.clear();

    match result {
        Ok(CommandOutput::Records(records)) => {
            match output {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                }
                OutputFormat::Text => print_records(&records),
            }
            Ok(())
        }
        Ok(CommandOutput::Text(text)) => {
            println!("{text}");
            Ok(())
        }
        Err(ShellError::Execution(err)) => {
            eprintln!("{}", serde_json::to_string_pretty(&err)?);
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let layout = config.layout()?;
    config.session_builder()?;
    println!(
        "configuration ok: shell {:?}, layout {:?}, {} credential fields, min_warm {}",
        config.shell.bin,
        layout,
        config.credentials().iter().count(),
        config.pool.min_warm,
    );
    Ok(())
}

/// Apply `--cred name=value` overrides on top of the configured fields.
fn merge_credentials(base: Credentials, overrides: &[String]) -> anyhow::Result<Credentials> {
    let mut credentials = base;
    for pair in overrides {
        let Some((name, value)) = pair.split_once('=') else {
            anyhow::bail!("credential override {pair:?} is not of the form name=value");
        };
        credentials.insert(name, value);
    }
    Ok(credentials)
}

fn print_records(records: &[Record]) {
    for (ix, record) in records.iter().enumerate() {
        if ix > 0 {
            println!();
        }
        print_record(record, 0);
    }
}

fn print_record(record: &Record, depth: usize) {
    let pad = "  ".repeat(depth);
    for (name, value) in record.iter() {
        match value {
            Value::Record(nested) => {
                println!("{pad}{name}:");
                print_record(nested, depth + 1);
            }
            Value::List(items) => {
                println!("{pad}{name}: [{}]", render_list(items));
            }
            Value::Str(s) => println!("{pad}{name}: {s}"),
            Value::Int(n) => println!("{pad}{name}: {n}"),
            Value::Bool(b) => println!("{pad}{name}: {b}"),
        }
    }
}

fn render_list(items: &[Value]) -> String {
    let rendered: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Str(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            // Structured members fall back to JSON so nothing is lost.
            other => serde_json::to_string(other).unwrap_or_default(),
        })
        .collect();
    rendered.join(", ")
}
