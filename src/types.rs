use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::Error;

/// Port spec used when the caller does not supply one.
pub const DEFAULT_PORT_SPEC: &str = "5000";
/// Script selection used when the caller does not supply one.
pub const DEFAULT_SCRIPTS: &str = "http-headers,http-title";
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Named preset controlling the base scan technique.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    #[default]
    Basic,
    Stealth,
    Udp,
    Full,
    Fast,
    Intensive,
    Vuln,
    Custom,
}

impl ScanProfile {
    pub const ALL: [ScanProfile; 8] = [
        ScanProfile::Basic,
        ScanProfile::Stealth,
        ScanProfile::Udp,
        ScanProfile::Full,
        ScanProfile::Fast,
        ScanProfile::Intensive,
        ScanProfile::Vuln,
        ScanProfile::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ScanProfile::Basic => "basic",
            ScanProfile::Stealth => "stealth",
            ScanProfile::Udp => "udp",
            ScanProfile::Full => "full",
            ScanProfile::Fast => "fast",
            ScanProfile::Intensive => "intensive",
            ScanProfile::Vuln => "vuln",
            ScanProfile::Custom => "custom",
        }
    }

    /// Lenient parse: anything unrecognized maps to [`ScanProfile::Custom`].
    pub fn from_name_lossy(name: &str) -> Self {
        name.parse().unwrap_or(ScanProfile::Custom)
    }
}

impl fmt::Display for ScanProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let profile = match s.trim().to_ascii_lowercase().as_str() {
            "basic" | "basico" | "básico" => ScanProfile::Basic,
            "stealth" => ScanProfile::Stealth,
            "udp" => ScanProfile::Udp,
            "full" | "completo" => ScanProfile::Full,
            "fast" | "rapido" | "rápido" => ScanProfile::Fast,
            "intensive" | "intensivo" => ScanProfile::Intensive,
            "vuln" => ScanProfile::Vuln,
            "custom" | "personalizado" => ScanProfile::Custom,
            other => return Err(Error::invalid(format!("unknown scan profile: {other}"))),
        };
        Ok(profile)
    }
}

/// Caller-supplied free-form engine flags.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ExtraArgs {
    /// A single string, split on whitespace.
    Line(String),
    /// Already tokenized; kept as-is.
    Tokens(Vec<String>),
}

impl ExtraArgs {
    pub fn tokens(&self) -> Vec<String> {
        match self {
            ExtraArgs::Line(line) => line.split_whitespace().map(str::to_string).collect(),
            ExtraArgs::Tokens(tokens) => tokens.clone(),
        }
    }
}

/// A validated request to scan one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub host: String,
    pub port_spec: String,
    pub script_selection: String,
    pub profile: ScanProfile,
    pub extra_args: Option<ExtraArgs>,
}

impl ScanRequest {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port_spec: DEFAULT_PORT_SPEC.to_string(),
            script_selection: DEFAULT_SCRIPTS.to_string(),
            profile: ScanProfile::default(),
            extra_args: None,
        }
    }

    pub fn ports(mut self, spec: impl Into<String>) -> Self {
        self.port_spec = spec.into();
        self
    }

    pub fn scripts(mut self, selection: impl Into<String>) -> Self {
        self.script_selection = selection.into();
        self
    }

    pub fn profile(mut self, profile: ScanProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn extra(mut self, extra: ExtraArgs) -> Self {
        self.extra_args = Some(extra);
        self
    }
}

/// Wire shape of a scan request. Missing fields fall back to defaults.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ScanRequestBody {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default, alias = "ports", alias = "puerto")]
    pub port_spec: Option<String>,
    #[serde(default, alias = "scripts")]
    pub script_selection: Option<String>,
    #[serde(default, alias = "tipo")]
    pub profile: Option<String>,
    #[serde(default, alias = "argumentos")]
    pub extra_args: Option<ExtraArgs>,
}

impl TryFrom<ScanRequestBody> for ScanRequest {
    type Error = Error;

    /// Strict conversion: an unknown profile name is rejected.
    fn try_from(body: ScanRequestBody) -> Result<Self, Self::Error> {
        let profile = match body.profile.as_deref() {
            Some(p) if !p.trim().is_empty() => p.parse()?,
            _ => ScanProfile::default(),
        };
        Ok(ScanRequest {
            host: body.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port_spec: body.port_spec.unwrap_or_else(|| DEFAULT_PORT_SPEC.to_string()),
            script_selection: body
                .script_selection
                .unwrap_or_else(|| DEFAULT_SCRIPTS.to_string()),
            profile,
            extra_args: body.extra_args,
        })
    }
}

/// Live snapshot of the orchestrator, cloned out to pollers.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStatus {
    pub running: bool,
    pub message: String,
    pub last_report_id: Option<ReportId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ReportId(Uuid);

impl ReportId {
    pub fn new() -> Self {
        ReportId(Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ReportId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(ReportId)
    }
}

/// Immutable record of one completed scan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub id: ReportId,
    pub name: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub host: String,
    pub port_spec: String,
    pub script_selection: String,
    pub profile: ScanProfile,
    pub arguments: Vec<String>,
    pub size_bytes: u64,
}

/// Listing view of a [`Report`] without its body.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub id: ReportId,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub host: String,
    pub port_spec: String,
    pub script_selection: String,
    pub profile: ScanProfile,
    pub size_bytes: u64,
}

impl From<&Report> for ReportSummary {
    fn from(r: &Report) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            created_at: r.created_at,
            host: r.host.clone(),
            port_spec: r.port_spec.clone(),
            script_selection: r.script_selection.clone(),
            profile: r.profile,
            size_bytes: r.size_bytes,
        }
    }
}

/// Typed result returned by a scan engine.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Hosts in engine order.
    pub hosts: Vec<HostScan>,
    pub stats: Option<RunStats>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct HostScan {
    pub address: String,
    pub state: String,
    #[serde(default)]
    pub hostnames: Vec<String>,
    /// Protocols in engine order.
    #[serde(default)]
    pub protocols: Vec<ProtocolScan>,
}

impl HostScan {
    /// Port table for `proto`, created on first use.
    pub fn protocol_mut(&mut self, proto: &str) -> &mut ProtocolScan {
        let idx = match self.protocols.iter().position(|p| p.name == proto) {
            Some(idx) => idx,
            None => {
                self.protocols.push(ProtocolScan {
                    name: proto.to_string(),
                    ports: BTreeMap::new(),
                });
                self.protocols.len() - 1
            }
        };
        &mut self.protocols[idx]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolScan {
    pub name: String,
    /// Ports keyed by number, so iteration is ascending.
    pub ports: BTreeMap<u16, PortInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct PortInfo {
    pub state: String,
    pub name: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub extrainfo: Option<String>,
    #[serde(default)]
    pub scripts: Vec<ScriptOutput>,
}

impl PortInfo {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            ..Default::default()
        }
    }

    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn script(mut self, id: impl Into<String>, output: impl Into<String>) -> Self {
        self.scripts.push(ScriptOutput {
            id: id.into(),
            output: output.into(),
        });
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScriptOutput {
    pub id: String,
    pub output: String,
}

/// Aggregate per-run statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub duration: Option<String>,
    pub total_hosts: u32,
    pub up_hosts: u32,
    pub down_hosts: u32,
}
