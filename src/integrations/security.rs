//! Heuristic vulnerability checks: exposed services and pending updates

use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;
use tracing::debug;

use super::{run_command, VulnerabilityScanner};
use crate::diagnostics::{Severity, Vulnerability};
use crate::error::{DiagnosticsError, Result};

/// Ports commonly associated with remotely reachable services
/// (ftp, ssh, telnet, smtp, http, https, rdp, vnc).
pub const SENSITIVE_PORTS: &[u16] = &[21, 22, 23, 25, 80, 443, 3389, 5900];

pub struct HeuristicScanner {
    ports: Vec<u16>,
    command_timeout: Duration,
}

impl HeuristicScanner {
    pub fn new(command_timeout: Duration) -> Self {
        Self::with_ports(SENSITIVE_PORTS.to_vec(), command_timeout)
    }

    pub fn with_ports(ports: Vec<u16>, command_timeout: Duration) -> Self {
        Self {
            ports,
            command_timeout,
        }
    }

    async fn pending_updates(&self) -> Option<usize> {
        if cfg!(target_os = "macos") {
            let out = run_command("softwareupdate", &["-l"], self.command_timeout)
                .await
                .map_err(|err| debug!(error = %err, "softwareupdate unavailable"))
                .ok()?;
            return Some(count_softwareupdate_items(&out));
        }
        if cfg!(target_os = "linux") {
            let out = run_command("apt", &["list", "--upgradable"], self.command_timeout)
                .await
                .map_err(|err| debug!(error = %err, "apt unavailable"))
                .ok()?;
            return Some(count_apt_upgradable(&out));
        }
        None
    }
}

/// Whether something already listens on `port` on the loopback interface.
/// Only `AddrInUse` counts: a bind refused for lack of privilege says
/// nothing about the port.
pub fn port_in_use(port: u16) -> bool {
    match TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))) {
        Ok(_) => false,
        Err(err) => err.kind() == ErrorKind::AddrInUse,
    }
}

pub fn count_apt_upgradable(output: &str) -> usize {
    output
        .lines()
        .filter(|l| l.contains("[upgradable from:"))
        .count()
}

pub fn count_softwareupdate_items(output: &str) -> usize {
    output
        .lines()
        .filter(|l| l.trim_start().starts_with("* "))
        .count()
}

#[async_trait]
impl VulnerabilityScanner for HeuristicScanner {
    async fn scan(&self) -> Result<Vec<Vulnerability>> {
        let ports = self.ports.clone();
        let open = tokio::task::spawn_blocking(move || {
            ports.into_iter().filter(|p| port_in_use(*p)).collect::<Vec<_>>()
        })
        .await
        .map_err(|err| DiagnosticsError::unavailable("vulnerability_scan", err))?;

        let mut found: Vec<Vulnerability> = open
            .into_iter()
            .map(|port| Vulnerability {
                kind: "open_port".to_string(),
                severity: Severity::Low,
                details: format!("Port {port} is open"),
            })
            .collect();

        if let Some(count) = self.pending_updates().await.filter(|c| *c > 0) {
            found.push(Vulnerability {
                kind: "outdated_software".to_string(),
                severity: Severity::Medium,
                details: format!("{count} software updates are available"),
            });
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bound_port_is_reported_in_use() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_in_use(port));

        drop(listener);
        assert!(!port_in_use(port));
    }

    #[tokio::test]
    async fn open_ports_become_low_severity_findings() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let scanner = HeuristicScanner::with_ports(vec![port], Duration::from_millis(1));
        let found = scanner.scan().await.unwrap();

        let open: Vec<_> = found.iter().filter(|v| v.kind == "open_port").collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].severity, Severity::Low);
        assert_eq!(open[0].details, format!("Port {port} is open"));
    }

    #[test]
    fn counts_apt_upgradable_lines() {
        let out = "\
Listing... Done
curl/jammy-updates 7.81.0-1ubuntu1.16 amd64 [upgradable from: 7.81.0-1ubuntu1.15]
openssl/jammy-security 3.0.2-0ubuntu1.18 amd64 [upgradable from: 3.0.2-0ubuntu1.17]
";
        assert_eq!(count_apt_upgradable(out), 2);
        assert_eq!(count_apt_upgradable("Listing... Done\n"), 0);
    }

    #[test]
    fn counts_softwareupdate_labels() {
        let out = "\
Software Update Tool

Finding available software
Software Update found the following new or updated software:
* Label: Safari17.4-17.4
\tTitle: Safari, Version: 17.4, Size: 150MB, Recommended: YES,
";
        assert_eq!(count_softwareupdate_items(out), 1);
        assert_eq!(count_softwareupdate_items("No new software available.\n"), 0);
    }
}
