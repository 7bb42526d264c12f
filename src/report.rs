//! Rendering of engine results into report text, and construction of
//! [`Report`] records.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use time::{macros::format_description, OffsetDateTime};

use crate::types::{
    HostScan, PortInfo, Report, ReportId, RunStats, ScanProfile, ScanRequest, ScanResult,
};

const RULE_WIDTH: usize = 50;
const HOST_RULE_WIDTH: usize = 40;

/// Everything about a scan request a report header needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMeta {
    pub host: String,
    pub port_spec: String,
    pub script_selection: String,
    pub profile: ScanProfile,
    pub arguments: Vec<String>,
    pub timestamp: OffsetDateTime,
}

impl ReportMeta {
    pub fn from_request(req: &ScanRequest, arguments: Vec<String>, timestamp: OffsetDateTime) -> Self {
        Self {
            host: req.host.clone(),
            port_spec: req.port_spec.clone(),
            script_selection: req.script_selection.clone(),
            profile: req.profile,
            arguments,
            timestamp,
        }
    }
}

/// Output layout.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStyle {
    /// Full per-port listing with script output. Stored reports use this.
    #[default]
    Detailed,
    /// Open ports only.
    Simple,
    /// The typed result as pretty JSON.
    Json,
}

/// Build the stored report for a finished scan.
pub fn build_report(result: &ScanResult, meta: ReportMeta) -> Report {
    let content = format_detailed(result, &meta);
    Report {
        id: ReportId::new(),
        name: report_name(meta.timestamp),
        size_bytes: content.len() as u64,
        content,
        created_at: meta.timestamp,
        host: meta.host,
        port_spec: meta.port_spec,
        script_selection: meta.script_selection,
        profile: meta.profile,
        arguments: meta.arguments,
    }
}

/// `scan_YYYYmmdd_HHMMSS`
pub fn report_name(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    format!("scan_{}", ts.format(fmt).unwrap_or_default())
}

fn display_time(ts: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    ts.format(fmt).unwrap_or_default()
}

pub fn format(result: &ScanResult, meta: &ReportMeta, style: ReportStyle) -> String {
    match style {
        ReportStyle::Detailed => format_detailed(result, meta),
        ReportStyle::Simple => format_simple(result, meta),
        ReportStyle::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
    }
}

/// Canonical report text. Deterministic for identical inputs.
pub fn format_detailed(result: &ScanResult, meta: &ReportMeta) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== SCAN REPORT ===");
    let _ = writeln!(out, "Date: {}", display_time(meta.timestamp));
    let _ = writeln!(out, "Target host: {}", meta.host);
    let _ = writeln!(out, "Port(s): {}", meta.port_spec);
    let _ = writeln!(out, "Profile: {}", meta.profile);
    let _ = writeln!(out, "Scripts: {}", meta.script_selection);
    let _ = writeln!(out, "Arguments: {}", meta.arguments.join(" "));
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    out.push('\n');

    if result.hosts.is_empty() {
        let _ = writeln!(out, "No hosts found.");
        let _ = writeln!(
            out,
            "The target {} appears to be down or unreachable. If it blocks ping probes, try adding -Pn.",
            meta.host
        );
        out.push('\n');
    }

    for host in &result.hosts {
        write_host(&mut out, host);
    }

    if let Some(stats) = &result.stats {
        write_stats(&mut out, stats);
    }
    out
}

fn write_host(out: &mut String, host: &HostScan) {
    let _ = writeln!(out, "Host: {} ({})", host.address, host.state);
    if !host.hostnames.is_empty() {
        let _ = writeln!(out, "Hostnames: {}", host.hostnames.join(", "));
    }
    let _ = writeln!(out, "{}", "-".repeat(HOST_RULE_WIDTH));

    for proto in &host.protocols {
        let _ = writeln!(out, "Protocol: {}", proto.name);
        for (port, info) in &proto.ports {
            let _ = writeln!(out, "{}", port_line(*port, &proto.name, info));
            if !info.scripts.is_empty() {
                let _ = writeln!(out, "    Scripts:");
                for script in &info.scripts {
                    let _ = writeln!(out, "      [{}]:", script.id);
                    for line in script.output.trim().lines() {
                        let _ = writeln!(out, "        {}", line);
                    }
                }
                out.push('\n');
            }
        }
    }
    out.push('\n');
}

fn port_line(port: u16, proto: &str, info: &PortInfo) -> String {
    let mut line = format!("  Port {port}/{proto}: {}", info.state);
    let fields = [
        ("Service", &info.name),
        ("Product", &info.product),
        ("Version", &info.version),
        ("Info", &info.extrainfo),
    ];
    for (label, value) in fields {
        if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
            let _ = write!(line, " - {label}: {v}");
        }
    }
    line
}

fn write_stats(out: &mut String, stats: &RunStats) {
    let _ = writeln!(out, "Statistics:");
    if let Some(d) = &stats.duration {
        let _ = writeln!(out, "  Duration: {d}");
    }
    let _ = writeln!(
        out,
        "  Hosts: {} total, {} up, {} down",
        stats.total_hosts, stats.up_hosts, stats.down_hosts
    );
}

pub fn format_simple(result: &ScanResult, meta: &ReportMeta) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== SCAN REPORT (simple) ===");
    let _ = writeln!(out, "Date: {}", display_time(meta.timestamp));
    let _ = writeln!(out, "Host: {}", meta.host);
    let _ = writeln!(out, "Ports: {}", meta.port_spec);
    out.push('\n');

    if result.hosts.is_empty() {
        let _ = writeln!(out, "No hosts found.");
    }
    for host in &result.hosts {
        let _ = writeln!(out, "Host: {} - {}", host.address, host.state);
        let open = open_ports(host);
        if open.is_empty() {
            let _ = writeln!(out, "No open ports found.");
        } else {
            let _ = writeln!(out, "Open ports:");
            for p in open {
                let _ = writeln!(out, "  - {p}");
            }
        }
        out.push('\n');
    }
    out
}

/// `port/proto (service)` for every open port of a host.
pub fn open_ports(host: &HostScan) -> Vec<String> {
    host.protocols
        .iter()
        .flat_map(|proto| {
            proto
                .ports
                .iter()
                .filter(|(_, info)| info.state == "open")
                .map(move |(port, info)| {
                    format!(
                        "{port}/{} ({})",
                        proto.name,
                        info.name.as_deref().unwrap_or("unknown")
                    )
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn meta() -> ReportMeta {
        ReportMeta {
            host: "10.0.0.5".into(),
            port_spec: "80".into(),
            script_selection: "default".into(),
            profile: ScanProfile::Basic,
            arguments: vec!["-sT".into(), "-p".into(), "80".into(), "-T4".into()],
            timestamp: datetime!(2024-03-01 12:30:05 UTC),
        }
    }

    fn one_port_result() -> ScanResult {
        let mut host = HostScan {
            address: "10.0.0.5".into(),
            state: "up".into(),
            ..Default::default()
        };
        host.protocol_mut("tcp")
            .ports
            .insert(80, PortInfo::new("open").service("http"));
        ScanResult {
            hosts: vec![host],
            stats: None,
        }
    }

    #[test]
    fn header_then_single_port_line() {
        let text = format_detailed(&one_port_result(), &meta());
        assert!(text.starts_with("=== SCAN REPORT ===\nDate: 2024-03-01 12:30:05\n"));
        assert!(text.contains("Arguments: -sT -p 80 -T4\n"));
        let header_end = text.find(&"=".repeat(RULE_WIDTH)).unwrap();
        let host_at = text.find("Host: 10.0.0.5 (up)").unwrap();
        assert!(host_at > header_end);

        let port_lines: Vec<_> = text.lines().filter(|l| l.trim_start().starts_with("Port ")).collect();
        assert_eq!(port_lines.len(), 1);
        let line = port_lines[0];
        let p = line.find("80").unwrap();
        let s = line.find("http").unwrap();
        assert!(p < s);
        assert!(!text.contains("Scripts:\n"));
    }

    #[test]
    fn no_hosts_explains_instead_of_empty_body() {
        let text = format_detailed(&ScanResult::default(), &meta());
        assert!(text.contains("No hosts found."));
        assert!(text.contains("unreachable"));
    }

    #[test]
    fn ports_sorted_and_scripts_grouped() {
        let mut host = HostScan {
            address: "192.168.1.2".into(),
            state: "up".into(),
            hostnames: vec!["nas.lan".into()],
            ..Default::default()
        };
        let tcp = host.protocol_mut("tcp");
        tcp.ports.insert(
            443,
            PortInfo::new("open")
                .service("https")
                .script("ssl-cert", "Subject: nas\nIssuer: ca\n"),
        );
        tcp.ports.insert(22, PortInfo::new("open").service("ssh"));
        let result = ScanResult {
            hosts: vec![host],
            stats: Some(RunStats {
                duration: Some("1.50s".into()),
                total_hosts: 1,
                up_hosts: 1,
                down_hosts: 0,
            }),
        };
        let text = format_detailed(&result, &meta());
        assert!(text.contains("Hostnames: nas.lan\n"));
        let p22 = text.find("Port 22/tcp").unwrap();
        let p443 = text.find("Port 443/tcp").unwrap();
        assert!(p22 < p443);
        assert!(text.contains("    Scripts:\n      [ssl-cert]:\n        Subject: nas\n        Issuer: ca\n"));
        assert!(text.contains("Statistics:\n  Duration: 1.50s\n  Hosts: 1 total, 1 up, 0 down\n"));
    }

    #[test]
    fn formatting_is_deterministic() {
        let r = one_port_result();
        assert_eq!(format_detailed(&r, &meta()), format_detailed(&r, &meta()));
    }

    #[test]
    fn build_report_fills_metadata() {
        let report = build_report(&one_port_result(), meta());
        assert_eq!(report.name, "scan_20240301_123005");
        assert_eq!(report.size_bytes, report.content.len() as u64);
        assert_eq!(report.host, "10.0.0.5");
        assert_eq!(report.arguments.len(), 4);
    }

    #[test]
    fn simple_style_lists_open_ports() {
        let text = format(&one_port_result(), &meta(), ReportStyle::Simple);
        assert!(text.contains("  - 80/tcp (http)"));
    }
}
