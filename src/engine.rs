//! Scan engine seam and the nmap-backed implementation.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{HostScan, PortInfo, RunStats, ScanResult, ScriptOutput};

/// Performs the actual probing for one target.
///
/// Implementations receive a flat, already-ordered token list and must never
/// hand it to a shell. Timeouts are the engine's business.
#[async_trait]
pub trait ScanEngine: Send + Sync {
    async fn scan(&self, host: &str, args: &[String]) -> Result<ScanResult>;
}

/// Runs the `nmap` binary with XML output on stdout.
#[derive(Debug, Clone)]
pub struct NmapEngine {
    binary: PathBuf,
}

impl Default for NmapEngine {
    fn default() -> Self {
        Self::new("nmap")
    }
}

impl NmapEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ScanEngine for NmapEngine {
    async fn scan(&self, host: &str, args: &[String]) -> Result<ScanResult> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .arg("-oX")
            .arg("-")
            .arg("--")
            .arg(host)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!(?cmd, "executing nmap");

        let output = cmd.output().await.map_err(|e| {
            Error::engine(format!(
                "failed to execute {}: {e}",
                self.binary.display()
            ))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::engine(format!(
                "nmap exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let xml = String::from_utf8_lossy(&output.stdout);
        let result = parse_nmap_xml(&xml)?;
        info!(host, hosts = result.hosts.len(), "nmap finished");
        Ok(result)
    }
}

/// Convert nmap's `-oX` document into a [`ScanResult`].
pub fn parse_nmap_xml(xml: &str) -> Result<ScanResult> {
    let run: xml::NmapRun = quick_xml::de::from_str(xml)
        .map_err(|e| Error::engine(format!("unparseable nmap output: {e}")))?;

    let hosts = run.hosts.into_iter().map(convert_host).collect();
    let stats = run.runstats.map(|rs| RunStats {
        duration: rs
            .finished
            .and_then(|f| f.elapsed)
            .map(|secs| format!("{secs}s")),
        total_hosts: rs.hosts.as_ref().map_or(0, |h| h.total),
        up_hosts: rs.hosts.as_ref().map_or(0, |h| h.up),
        down_hosts: rs.hosts.as_ref().map_or(0, |h| h.down),
    });
    Ok(ScanResult { hosts, stats })
}

fn convert_host(h: xml::Host) -> HostScan {
    // Prefer the IP address over a MAC entry.
    let address = h
        .addresses
        .iter()
        .find(|a| a.addr_type != "mac")
        .or_else(|| h.addresses.first())
        .map(|a| a.addr.clone())
        .unwrap_or_default();

    let mut host = HostScan {
        address,
        state: h.status.map(|s| s.state).unwrap_or_else(|| "unknown".into()),
        hostnames: h
            .hostnames
            .map(|hn| hn.hostnames.into_iter().map(|n| n.name).collect())
            .unwrap_or_default(),
        protocols: Vec::new(),
    };

    for port in h.ports.map(|p| p.ports).unwrap_or_default() {
        let service = port.service.unwrap_or_default();
        let info = PortInfo {
            state: port.state.state,
            name: service.name.filter(|s| !s.is_empty()),
            product: service.product,
            version: service.version,
            extrainfo: service.extrainfo,
            scripts: port
                .scripts
                .into_iter()
                .map(|s| ScriptOutput {
                    id: s.id,
                    output: s.output,
                })
                .collect(),
        };
        host.protocol_mut(&port.protocol).ports.insert(port.portid, info);
    }
    host
}

/// Partial nmap XML schema; only what reports render.
mod xml {
    use super::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct NmapRun {
        #[serde(rename = "host", default)]
        pub hosts: Vec<Host>,
        #[serde(default)]
        pub runstats: Option<RunStats>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Host {
        #[serde(default)]
        pub status: Option<Status>,
        #[serde(rename = "address", default)]
        pub addresses: Vec<Address>,
        #[serde(default)]
        pub hostnames: Option<Hostnames>,
        #[serde(default)]
        pub ports: Option<Ports>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Status {
        #[serde(rename = "@state")]
        pub state: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct Address {
        #[serde(rename = "@addr")]
        pub addr: String,
        #[serde(rename = "@addrtype", default)]
        pub addr_type: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct Hostnames {
        #[serde(rename = "hostname", default)]
        pub hostnames: Vec<Hostname>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Hostname {
        #[serde(rename = "@name")]
        pub name: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct Ports {
        #[serde(rename = "port", default)]
        pub ports: Vec<Port>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Port {
        #[serde(rename = "@protocol")]
        pub protocol: String,
        #[serde(rename = "@portid")]
        pub portid: u16,
        pub state: PortState,
        #[serde(default)]
        pub service: Option<Service>,
        #[serde(rename = "script", default)]
        pub scripts: Vec<Script>,
    }

    #[derive(Debug, Deserialize)]
    pub struct PortState {
        #[serde(rename = "@state")]
        pub state: String,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Service {
        #[serde(rename = "@name", default)]
        pub name: Option<String>,
        #[serde(rename = "@product", default)]
        pub product: Option<String>,
        #[serde(rename = "@version", default)]
        pub version: Option<String>,
        #[serde(rename = "@extrainfo", default)]
        pub extrainfo: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Script {
        #[serde(rename = "@id")]
        pub id: String,
        #[serde(rename = "@output", default)]
        pub output: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct RunStats {
        #[serde(default)]
        pub finished: Option<Finished>,
        #[serde(default)]
        pub hosts: Option<HostCounts>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Finished {
        #[serde(rename = "@elapsed", default)]
        pub elapsed: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct HostCounts {
        #[serde(rename = "@up", default)]
        pub up: u32,
        #[serde(rename = "@down", default)]
        pub down: u32,
        #[serde(rename = "@total", default)]
        pub total: u32,
    }
}
