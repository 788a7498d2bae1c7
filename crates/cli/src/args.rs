use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dhvani")]
#[command(version = "0.1.0")]
#[command(about = "Protocol fingerprinting over TCP, TLS, UDP and ICMP", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format: text, json
    #[arg(short, long, default_value = "text", global = true, value_parser = ["text", "json"])]
    pub format: String,
}

/// Timeout tuning shared by every network subcommand.
#[derive(Args, Clone)]
pub struct Tuning {
    /// Preset: fast, balanced, accurate
    #[arg(long, default_value = "balanced", value_parser = ["fast", "balanced", "accurate"])]
    pub preset: String,

    /// JSON config file; replaces the preset when given
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a service-probe corpus into a port-indexed JSON table
    Compile {
        /// Corpus file in the nmap-service-probes format
        corpus: PathBuf,

        /// Where to write the compiled table
        #[arg(short, long, default_value = "probe_table.json")]
        output: PathBuf,
    },

    /// Connect to a TCP port, grab its response and version-scan it
    Scan {
        /// Target IP or hostname
        host: String,

        #[arg(short, long)]
        port: u16,

        /// Compiled probe table; without it only the banner is reported
        #[arg(long)]
        table: Option<PathBuf>,

        /// Stop after the connect, send nothing
        #[arg(long)]
        connect_only: bool,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Send the table's UDP probes to a port
    Udp {
        host: String,

        #[arg(short, long)]
        port: u16,

        #[arg(long)]
        table: PathBuf,

        #[command(flatten)]
        tuning: Tuning,
    },

    /// Send one ICMP echo request (needs raw-socket privileges)
    Ping {
        host: String,

        #[command(flatten)]
        tuning: Tuning,
    },
}
