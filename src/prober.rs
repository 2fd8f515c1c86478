use std::ffi::OsStr;
use std::io;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use ipnet::IpNet;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SCAN_PORT_RANGE;
use crate::error::ProbeError;
use crate::status::ScanStatus;
use crate::types::OpenPort;

/// Install locations checked when the scanner is not on `PATH`.
const COMMON_LOCATIONS: &[&str] = &[
    r"C:\Program Files (x86)\Nmap\nmap.exe",
    r"C:\Program Files\Nmap\nmap.exe",
    r"D:\Program Files (x86)\Nmap\nmap.exe",
    r"D:\Program Files\Nmap\nmap.exe",
    r"D:\Tools\Nmap\nmap.exe",
    "/usr/bin/nmap",
    "/usr/local/bin/nmap",
    "/opt/homebrew/bin/nmap",
];

/// Source of open ports for a scan target.
///
/// `probe` returns immediately; ports arrive on the receiver in the order the
/// underlying scanner reports them and the channel closes when the scan ends.
/// Problems are reported through `status` and never abort the caller.
pub trait PortProber: Send + Sync {
    fn probe(
        &self,
        target: &str,
        status: &ScanStatus,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<OpenPort>;
}

/// Port prober backed by an `nmap` subprocess.
#[derive(Debug, Clone)]
pub struct NmapProber {
    binary: Option<PathBuf>,
}

impl NmapProber {
    /// Find the scanner binary once, at construction.
    pub fn locate(explicit: Option<&Path>) -> Self {
        let binary = locate_nmap(explicit);
        match &binary {
            Some(path) => info!(path = %path.display(), "nmap found"),
            None => warn!("nmap binary not found; scans will report no open ports"),
        }
        Self { binary }
    }

    pub fn with_binary(binary: Option<PathBuf>) -> Self {
        Self { binary }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

impl PortProber for NmapProber {
    fn probe(
        &self,
        target: &str,
        status: &ScanStatus,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<OpenPort> {
        let (tx, rx) = mpsc::channel(64);
        let binary = self.binary.clone();
        let target = target.to_string();
        let status = status.clone();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let result = match binary {
                Some(bin) => run_nmap(&bin, &target, &status, &cancel, &tx).await,
                None => Err(ProbeError::ToolUnavailable),
            };
            if let Err(e) = result {
                warn!(error = %e, %target, "port probe failed");
                let line = match &e {
                    ProbeError::ToolUnavailable => format!("Error: {e}"),
                    _ => format!("Port scan failed: {e}"),
                };
                status.log(line).await;
            }
        });

        rx
    }
}

/// Scanner arguments: full port range, aggressive timing, open ports only, no DNS.
/// IPv6 addresses and networks also need `-6`.
pub fn nmap_args(target: &str) -> Vec<String> {
    let mut args = vec![
        target.to_string(),
        "-p".to_string(),
        SCAN_PORT_RANGE.to_string(),
        "-T4".to_string(),
        "--open".to_string(),
        "-n".to_string(),
    ];
    if is_ipv6_target(target) {
        args.push("-6".to_string());
    }
    args
}

fn is_ipv6_target(target: &str) -> bool {
    target.parse::<Ipv6Addr>().is_ok() || matches!(target.parse::<IpNet>(), Ok(IpNet::V6(_)))
}

async fn run_nmap(
    binary: &Path,
    target: &str,
    status: &ScanStatus,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<OpenPort>,
) -> Result<(), ProbeError> {
    let args = nmap_args(target);
    status
        .log(format!("Executing: {} {}", binary.display(), args.join(" ")))
        .await;
    info!(binary = %binary.display(), %target, "launching port scan");

    let mut child = Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or_else(|| {
        ProbeError::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "scanner stdout was not captured",
        ))
    })?;
    // Drain stderr concurrently so a chatty scanner cannot block on a full pipe.
    let stderr_task = child.stderr.take().map(|mut err| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).trim().to_string()
        })
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut current_host = target.to_string();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Ok(());
            }
            next = lines.next_line() => next?,
        };
        let Some(line) = next else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            ScanLine::HostReport(host) => current_host = host,
            ScanLine::Discovered => {
                status.log(line).await;
                status.bump_progress().await;
            }
            ScanLine::OpenPort { port, service } => {
                status.log(format!("Found: {line}")).await;
                status.bump_progress().await;
                let open = OpenPort {
                    host: current_host.clone(),
                    port,
                    service,
                };
                if tx.send(open).await.is_err() {
                    // Nobody is listening any more.
                    let _ = child.kill().await;
                    return Ok(());
                }
            }
            ScanLine::Other => debug!(line, "scanner output"),
        }
    }

    let exit = child.wait().await?;
    if !exit.success() {
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        warn!(code = ?exit.code(), %stderr, "nmap exited unsuccessfully");
        status.log(format!("Nmap exited with error: {stderr}")).await;
    }
    Ok(())
}

/// Classification of one line of scanner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanLine {
    /// `Nmap scan report for <host>`: subsequent ports belong to this host.
    HostReport(String),
    /// Verbose-mode `Discovered open port ...` notice.
    Discovered,
    /// Port table row such as `8080/tcp open  http-proxy`.
    OpenPort { port: u16, service: String },
    Other,
}

pub fn parse_line(line: &str) -> ScanLine {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("Nmap scan report for ") {
        // `name (1.2.3.4)` when reverse DNS ran, a bare address otherwise.
        let host = match rest.rfind('(') {
            Some(i) if rest.ends_with(')') => &rest[i + 1..rest.len() - 1],
            _ => rest,
        };
        return ScanLine::HostReport(host.trim().to_string());
    }

    if line.contains("Discovered open port") {
        return ScanLine::Discovered;
    }

    let mut fields = line.split_whitespace();
    if let (Some(port_field), Some(state)) = (fields.next(), fields.next()) {
        if let Some((port, "tcp")) = port_field.split_once('/') {
            let port = port.parse::<u16>().ok().filter(|p| *p != 0);
            if let (Some(port), true) = (port, state.starts_with("open")) {
                let service = fields.collect::<Vec<_>>().join(" ");
                let service = if service.is_empty() {
                    "unknown".to_string()
                } else {
                    service
                };
                return ScanLine::OpenPort { port, service };
            }
        }
    }

    ScanLine::Other
}

/// Find the scanner: explicit path, then `PATH`, then common install locations.
pub fn locate_nmap(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.is_file().then(|| path.to_path_buf());
    }
    search_path("nmap", std::env::var_os("PATH").as_deref()).or_else(|| {
        COMMON_LOCATIONS
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
    })
}

fn search_path(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let exe = exe_name(name);
    std::env::split_paths(path_var?)
        .map(|dir| dir.join(&exe))
        .find(|p| p.is_file())
}

fn exe_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}
