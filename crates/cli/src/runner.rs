// runner.rs
use anyhow::{Context, Result};
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use dhvani_common::ScanConfig;
use dhvani_engine::SocketEngine;
use dhvani_probe_db::{compile_file, ProbeTable};
use dhvani_scanner_icmp::IcmpError;

use crate::args::Tuning;
use crate::output::{print_report, CompileSummary, OutputFormat, PingReport, TcpReport};

pub fn run_compile(corpus: &Path, output: &Path, format: OutputFormat) -> Result<()> {
    info!("Compiling probe corpus {}", corpus.display());
    let table = compile_file(corpus)
        .with_context(|| format!("Failed to compile {}", corpus.display()))?;
    table
        .save(output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    print_report(
        &CompileSummary {
            corpus: corpus.to_path_buf(),
            output: output.to_path_buf(),
            ports: table.len(),
        },
        format,
    )
}

pub async fn run_scan(
    host: &str,
    port: u16,
    table: Option<&Path>,
    connect_only: bool,
    tuning: &Tuning,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(tuning)?;
    let table = table.map(load_table).transpose()?;
    let engine = SocketEngine::new(config);

    info!("Scanning {}:{}", host, port);
    let started = Instant::now();
    let connection = if connect_only {
        engine.tcp_connect_only(host, port).await
    } else {
        engine.tcp_connect_send_and_receive(host, port).await
    }
    .with_context(|| format!("TCP scan of {host}:{port} failed"))?;

    let fingerprint = match (&connection, &table) {
        (Some(conn), Some(table)) if !connect_only => engine.tcp_version_scan(conn, table).await,
        _ => None,
    };

    print_report(
        &TcpReport {
            host: host.to_string(),
            port,
            open: connection.is_some(),
            connection,
            fingerprint,
            duration_ms: started.elapsed().as_millis(),
        },
        format,
    )
}

pub async fn run_udp(host: &str, port: u16, table: &Path, tuning: &Tuning, format: OutputFormat) -> Result<()> {
    let config = load_config(tuning)?;
    let table = load_table(table)?;
    let engine = SocketEngine::new(config);

    info!("UDP probing {}:{}", host, port);
    let report = engine
        .udp_scan(host, port, &table)
        .await
        .with_context(|| format!("UDP scan of {host}:{port} failed"))?;
    print_report(&report, format)
}

pub async fn run_ping(host: &str, tuning: &Tuning, format: OutputFormat) -> Result<()> {
    let engine = SocketEngine::new(load_config(tuning)?);

    let reply = match engine.socket_icmp(host).await {
        Ok(reply) => reply,
        Err(IcmpError::NotPermitted) => {
            warn!("Raw ICMP sockets need CAP_NET_RAW or root");
            return Err(IcmpError::NotPermitted.into());
        }
        Err(e) => return Err(e).with_context(|| format!("ICMP echo to {host} failed")),
    };

    print_report(
        &PingReport {
            host: host.to_string(),
            reply,
        },
        format,
    )
}

/// Preset (or config file), then `DHVANI_*` environment overrides.
fn load_config(tuning: &Tuning) -> Result<ScanConfig> {
    let base = match &tuning.config {
        Some(path) => ScanConfig::from_file(path)
            .with_context(|| format!("Invalid config file {}", path.display()))?,
        None => ScanConfig::preset(&tuning.preset)?,
    };
    Ok(base.with_env_overrides()?)
}

fn load_table(path: &Path) -> Result<ProbeTable> {
    ProbeTable::load(path).with_context(|| format!("Failed to load probe table {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("dhvani-cli-{}-{name}", std::process::id()))
    }

    fn tuning(preset: &str, config: Option<PathBuf>) -> Tuning {
        Tuning {
            preset: preset.to_string(),
            config,
        }
    }

    #[test]
    fn test_preset_config() {
        let config = load_config(&tuning("fast", None)).unwrap();
        assert_eq!(config.udp_timeout_ms, ScanConfig::fast().udp_timeout_ms);
        assert_eq!(config.icmp_timeout_ms, ScanConfig::fast().icmp_timeout_ms);
    }

    #[test]
    fn test_config_file_replaces_preset() {
        let path = scratch("config.json");
        std::fs::write(&path, r#"{ "udp_timeout_ms": 42 }"#).unwrap();
        let config = load_config(&tuning("fast", Some(path.clone()))).unwrap();
        assert_eq!(config.udp_timeout_ms, 42);
        assert_eq!(config.icmp_timeout_ms, ScanConfig::default().icmp_timeout_ms);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_bad_config_file() {
        let path = scratch("bad.json");
        std::fs::write(&path, r#"{ "udp_timeout_ms": 0 }"#).unwrap();
        let err = load_config(&tuning("balanced", Some(path.clone()))).unwrap_err();
        assert!(format!("{err:#}").contains("timeouts must be non-zero"));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_compile_writes_table() {
        let corpus = scratch("probes.txt");
        let output = scratch("table.json");
        std::fs::write(
            &corpus,
            "Probe TCP GetRequest q|GET / HTTP/1.0\\r\\n\\r\\n|\n\
             ports 80,8080\n\
             match http m|^HTTP/1\\.[01]| p/generic httpd/\n",
        )
        .unwrap();

        run_compile(&corpus, &output, OutputFormat::Json).unwrap();
        let table = load_table(&output).unwrap();
        assert_eq!(table.ports().collect::<Vec<_>>(), vec![80, 8080]);
        assert_eq!(table.port_to_probes_and_matches(80).matches.len(), 1);

        std::fs::remove_file(corpus).unwrap();
        std::fs::remove_file(output).unwrap();
    }

    #[test]
    fn test_missing_table() {
        let err = load_table(&scratch("absent.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to load probe table"));
    }
}
