//! Output formatting for command results

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use dhvani_common::{ConnectionResult, EchoReply, Fingerprint};
use dhvani_scanner_udp::UdpScanReport;

const BANNER_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "json" | "j" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompileSummary {
    pub corpus: PathBuf,
    pub output: PathBuf,
    pub ports: usize,
}

#[derive(Debug, Serialize)]
pub struct TcpReport {
    pub host: String,
    pub port: u16,
    pub open: bool,
    pub connection: Option<ConnectionResult>,
    pub fingerprint: Option<Fingerprint>,
    pub duration_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct PingReport {
    pub host: String,
    pub reply: Option<EchoReply>,
}

/// Anything a subcommand can print.
pub trait Render: Serialize {
    fn render_text(&self) -> String;
}

pub fn print_report<R: Render>(report: &R, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => println!("{}", report.render_text()),
    }
    Ok(())
}

impl Render for CompileSummary {
    fn render_text(&self) -> String {
        format!(
            "compiled {} -> {} ({} port(s))",
            self.corpus.display(),
            self.output.display(),
            self.ports
        )
    }
}

impl Render for TcpReport {
    fn render_text(&self) -> String {
        let Some(conn) = &self.connection else {
            return format!("{}:{} closed ({})", self.host, self.port, format_duration(self.duration_ms));
        };

        let mut lines = vec![format!(
            "{}:{} open{} service={} rtt={}",
            self.host,
            self.port,
            if conn.ssl { " tls" } else { "" },
            conn.service.as_deref().unwrap_or("unknown"),
            conn.round_trip
                .map(|d| format!("{}ms", d.as_millis()))
                .unwrap_or_else(|| "-".to_string()),
        )];
        if !conn.response.is_empty() {
            lines.push(format!("  response: {}", preview(&conn.response_text())));
        }
        match &self.fingerprint {
            Some(Fingerprint::Matched(m)) => {
                lines.push(format!("  fingerprint: {m}"));
                for cpe in &m.cpe {
                    lines.push(format!("  cpe: {cpe}"));
                }
            }
            Some(Fingerprint::Banner(banner)) => lines.push(format!("  banner: {}", preview(banner))),
            None => {}
        }
        lines.push(format!("  took {}", format_duration(self.duration_ms)));
        lines.join("\n")
    }
}

impl Render for UdpScanReport {
    fn render_text(&self) -> String {
        let mut lines = vec![format!(
            "{} udp {} service={}",
            self.peer,
            if self.responsive() { "responsive" } else { "silent" },
            self.service.as_deref().unwrap_or("unknown"),
        )];
        for reply in &self.replies {
            let classified = reply
                .service
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "unmatched".to_string());
            lines.push(format!(
                "  {}: {} byte(s), {}",
                reply.probe,
                reply.response.len(),
                classified
            ));
        }
        lines.join("\n")
    }
}

impl Render for PingReport {
    fn render_text(&self) -> String {
        match &self.reply {
            Some(reply) => format!(
                "{} echo reply in {:.3}ms",
                self.host,
                reply.response_time.as_secs_f64() * 1000.0
            ),
            None => format!("{} no echo reply", self.host),
        }
    }
}

/// First line of `text`, cut to a fixed width.
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim_end();
    if line.chars().count() > BANNER_WIDTH {
        let cut: String = line.chars().take(BANNER_WIDTH - 3).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

/// Format duration in a human-readable way
fn format_duration(millis: u128) -> String {
    let duration = Duration::from_millis(millis as u64);
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs == 0 {
        format!("{}ms", millis)
    } else if total_secs < 60 {
        if millis > 0 {
            format!("{}.{:03}s", total_secs, millis)
        } else {
            format!("{}s", total_secs)
        }
    } else {
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    }
}
