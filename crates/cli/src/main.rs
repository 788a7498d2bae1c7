mod args;
mod output;
mod runner;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use args::{Cli, Commands};
use output::OutputFormat;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let format = OutputFormat::parse(&cli.format);

    match cli.command {
        Commands::Compile { corpus, output } => runner::run_compile(&corpus, &output, format)?,
        Commands::Scan {
            host,
            port,
            table,
            connect_only,
            tuning,
        } => runner::run_scan(&host, port, table.as_deref(), connect_only, &tuning, format).await?,
        Commands::Udp {
            host,
            port,
            table,
            tuning,
        } => runner::run_udp(&host, port, &table, &tuning, format).await?,
        Commands::Ping { host, tuning } => runner::run_ping(&host, &tuning, format).await?,
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
