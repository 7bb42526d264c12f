use tracing::debug;

use crate::types::{ExtraArgs, ScanProfile, DEFAULT_PORT_SPEC};

/// Number of ports requested by the `fast` profile.
pub const TOP_PORTS: u16 = 1000;

/// Well-known UDP services substituted for the default (TCP) port sentinel.
pub const UDP_COMMON_PORTS: &[u16] = &[
    53, 67, 68, 69, 123, 161, 162, 500, 514, 520, 631, 1434, 1900, 4500, 5353,
];

/// Timing template appended when the caller did not choose one.
pub const DEFAULT_TIMING: &str = "-T4";

/// Script categories the engine ships with. Only used for diagnostics; any
/// selection is forwarded.
pub const SCRIPT_PRESETS: &[&str] = &["vuln", "discovery", "safe", "intrusive"];

const TIMING_NAMES: &[&str] = &["paranoid", "sneaky", "polite", "normal", "aggressive", "insane"];

/// Translate request options into the ordered engine argument list.
///
/// Never fails: unknown values fall back to defaults and free-form tokens are
/// forwarded untouched. The result is a flat token list, never a shell string.
pub fn build(
    profile: ScanProfile,
    port_spec: &str,
    script_selection: &str,
    extra_args: Option<&ExtraArgs>,
) -> Vec<String> {
    let mut args = base_flags(profile);

    let top_ports = args.iter().any(|a| a == "--top-ports");
    if !top_ports {
        if let Some(ports) = port_argument(profile, port_spec) {
            args.push("-p".to_string());
            args.push(ports);
        }
    }

    let scripts = script_selection.trim();
    if !scripts.is_empty() && scripts != "default" {
        if !is_known_preset(scripts) {
            debug!(scripts, "forwarding custom script selection");
        }
        args.push("--script".to_string());
        args.push(scripts.to_string());
    }

    let extra = extra_args.map(ExtraArgs::tokens).unwrap_or_default();
    if !args.iter().chain(extra.iter()).any(|a| is_timing_flag(a)) {
        args.push(DEFAULT_TIMING.to_string());
    }

    args.extend(extra);
    args
}

/// Base technique flags for a profile. Order matters.
pub fn base_flags(profile: ScanProfile) -> Vec<String> {
    let flags: &[&str] = match profile {
        ScanProfile::Basic => &["-sT"],
        ScanProfile::Stealth => &["-sS"],
        ScanProfile::Udp => &["-sU"],
        ScanProfile::Full => &["-sS", "-sU"],
        ScanProfile::Fast => &["-sS", "--top-ports"],
        ScanProfile::Intensive => &["-sS", "-A"],
        ScanProfile::Vuln => &["-sS", "-sV"],
        ScanProfile::Custom => &["-sS"],
    };
    let mut out: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
    if profile == ScanProfile::Fast {
        out.push(TOP_PORTS.to_string());
    }
    out
}

fn port_argument(profile: ScanProfile, port_spec: &str) -> Option<String> {
    let spec = port_spec.trim();
    if spec.is_empty() {
        return None;
    }
    if profile == ScanProfile::Udp && spec == DEFAULT_PORT_SPEC {
        return Some(udp_port_spec());
    }
    Some(spec.to_string())
}

/// Comma separated form of [`UDP_COMMON_PORTS`].
pub fn udp_port_spec() -> String {
    UDP_COMMON_PORTS
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// `-T0`..`-T5` or a named template such as `-Taggressive`.
pub fn is_timing_flag(arg: &str) -> bool {
    let Some(level) = arg.strip_prefix("-T") else {
        return false;
    };
    matches!(level, "0" | "1" | "2" | "3" | "4" | "5") || TIMING_NAMES.contains(&level)
}

/// True for the engine's script categories and wildcard patterns like `http-*`.
pub fn is_known_preset(selection: &str) -> bool {
    selection
        .split(',')
        .map(str::trim)
        .all(|s| SCRIPT_PRESETS.contains(&s) || s.contains('*'))
}
