// crates/engine/src/engine.rs
//! SocketEngine - one entry point per transport operation plus step evaluation

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

use dhvani_common::{
    ConnectionResult, DhvaniError, DhvaniResult, DirectTransport, EchoReply, Fingerprint,
    ScanConfig, TransportFactory,
};
use dhvani_fingerprint::{
    apply_extra_data, evaluate_conditions, ConditionOutcome, StepMethod, StepOutcome, SubStep,
};
use dhvani_probe_db::ProbeTable;
use dhvani_scanner_icmp::{IcmpError, IcmpPinger};
use dhvani_scanner_tcp::{TcpScanner, VersionScanner};
use dhvani_scanner_udp::{UdpScanReport, UdpScanner};

/// Stateless across calls: every operation opens its own sockets and returns
/// a fresh result, so one engine can serve many concurrent workers.
pub struct SocketEngine {
    tcp: TcpScanner,
    version: VersionScanner,
    udp: UdpScanner,
    icmp: IcmpPinger,
}

impl SocketEngine {
    /// Engine over plain OS sockets.
    pub fn new(config: ScanConfig) -> Self {
        Self::with_transport(Arc::new(DirectTransport), config)
    }

    /// Engine whose drivers open every socket through `factory`.
    pub fn with_transport(factory: Arc<dyn TransportFactory>, config: ScanConfig) -> Self {
        let tcp = TcpScanner::new(factory.clone(), config.clone());
        let version = VersionScanner::new(tcp.connector().clone(), config.clone());
        Self {
            udp: UdpScanner::new(factory, config.clone()),
            icmp: IcmpPinger::new(config.icmp_timeout()),
            tcp,
            version,
        }
    }

    pub async fn tcp_connect_only(&self, host: &str, port: u16) -> DhvaniResult<Option<ConnectionResult>> {
        self.tcp.connect_only(host, port).await
    }

    pub async fn tcp_connect_send_and_receive(
        &self,
        host: &str,
        port: u16,
    ) -> DhvaniResult<Option<ConnectionResult>> {
        self.tcp.connect_send_and_receive(host, port).await
    }

    /// Version-scan the service behind an earlier connection result.
    pub async fn tcp_version_scan(&self, target: &ConnectionResult, table: &ProbeTable) -> Option<Fingerprint> {
        self.version.scan(target, table).await
    }

    pub async fn udp_scan(&self, host: &str, port: u16, table: &ProbeTable) -> DhvaniResult<UdpScanReport> {
        self.udp.scan(host, port, table).await
    }

    pub async fn socket_icmp(&self, host: &str) -> Result<Option<EchoReply>, IcmpError> {
        self.icmp.ping(host).await
    }

    /// Run the transport operation a step names.
    ///
    /// Version and UDP scans need a probe table and are called directly.
    #[instrument(skip(self, step), fields(method = ?step.method))]
    pub async fn run_step(&self, step: &SubStep, host: &str, port: u16) -> Result<Option<StepOutcome>> {
        let outcome = match step.method {
            StepMethod::TcpConnectOnly => self
                .tcp_connect_only(host, port)
                .await
                .with_context(|| format!("tcp connect to {host}:{port}"))?
                .map(StepOutcome::Connection),
            StepMethod::TcpConnectSendAndReceive => self
                .tcp_connect_send_and_receive(host, port)
                .await
                .with_context(|| format!("tcp exchange with {host}:{port}"))?
                .map(StepOutcome::Connection),
            StepMethod::SocketIcmp => self
                .socket_icmp(host)
                .await
                .with_context(|| format!("icmp echo to {host}"))?
                .map(StepOutcome::Echo),
            method @ (StepMethod::TcpVersionScan | StepMethod::UdpScan) => {
                return Err(DhvaniError::UnsupportedMethod(format!(
                    "{method:?} needs a probe table; call it directly"
                ))
                .into());
            }
        };
        debug!(found = outcome.is_some(), "step finished");
        Ok(outcome)
    }

    pub fn response_conditions_matched(&self, step: &SubStep, outcome: Option<&StepOutcome>) -> ConditionOutcome {
        evaluate_conditions(step, outcome)
    }

    /// Record TLS status and condition results on `step`.
    pub fn apply_extra_data(&self, step: &mut SubStep, outcome: Option<&StepOutcome>) {
        apply_extra_data(step, outcome)
    }
}
