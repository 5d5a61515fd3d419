use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use stratum_cli::{CliConfig, Commands, OutputFormat};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stratum",
    about = "Inspect packs, search paths and level loads",
    version,
    author
)]
struct Cli {
    /// Default log level when RUST_LOG is unset
    #[arg(short, long, value_enum, global = true, default_value = "info")]
    log_level: LogLevel,

    /// Log line format
    #[arg(long, value_enum, global = true, default_value = "text")]
    log_format: LogFormat,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "STRATUM_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'o', long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(level: LogLevel, format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.log_format);

    let config = CliConfig::load(cli.config.as_deref())?;
    stratum_cli::run(cli.command, &config, cli.format)
}
