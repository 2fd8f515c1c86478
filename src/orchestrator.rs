//! Drives one discovery run end to end: probe ports, classify, fetch pages,
//! reconcile into the catalog.
//!
//! At most one run is active per process. Progress and log lines go to the
//! shared [`ScanStatus`]; the HTTP layer only ever reads it.

use std::net::Ipv6Addr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::catalog::CatalogStore;
use crate::classify::classify;
use crate::config::PROBE_PROGRESS_CAP;
use crate::error::ScanError;
use crate::fetch::{FetchOutcome, WebFetcher};
use crate::netdetect;
use crate::prober::PortProber;
use crate::reconcile::{upsert, Observation, UpsertOutcome};
use crate::status::ScanStatus;
use crate::types::{now_rfc3339, OpenPort, ScopeId};

/// Totals of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub open_ports: usize,
    pub created: usize,
    pub updated: usize,
    pub locked: usize,
    pub cancelled: bool,
}

struct ActiveScan {
    cancel: CancellationToken,
    /// Taken by `wait`; the token stays so the run can still be cancelled.
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    status: ScanStatus,
    prober: Arc<dyn PortProber>,
    fetcher: WebFetcher,
    catalog: Arc<dyn CatalogStore>,
    active: Mutex<Option<ActiveScan>>,
}

/// Handle shared by the HTTP layer and the CLI to start, cancel and observe runs.
#[derive(Clone)]
pub struct ScanSupervisor {
    inner: Arc<Inner>,
}

impl ScanSupervisor {
    pub fn new(
        status: ScanStatus,
        prober: Arc<dyn PortProber>,
        fetcher: WebFetcher,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                status,
                prober,
                fetcher,
                catalog,
                active: Mutex::new(None),
            }),
        }
    }

    pub fn status(&self) -> &ScanStatus {
        &self.inner.status
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.inner.catalog
    }

    /// Start a run in the background and return the resolved target.
    ///
    /// An empty target means the local network. Fails while another run is active.
    pub async fn start(&self, target: &str, scope_id: ScopeId) -> Result<String, ScanError> {
        let target = match target.trim() {
            "" => netdetect::default_target(),
            t => t.to_string(),
        };
        netdetect::validate_target(&target)?;

        let mut active = self.inner.active.lock().await;
        let current = self.inner.status.snapshot().await;
        if current.running {
            return Err(ScanError::AlreadyRunning {
                target: current.target,
            });
        }

        self.inner.status.reset(&target).await;
        info!(%target, scope_id, "scan started");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            Arc::clone(&self.inner),
            target.clone(),
            scope_id,
            cancel.clone(),
        ));
        *active = Some(ActiveScan {
            cancel,
            handle: Some(handle),
        });
        Ok(target)
    }

    /// Ask the active run to stop. It finishes at the next port or page boundary.
    pub async fn cancel(&self) -> Result<(), ScanError> {
        let active = self.inner.active.lock().await;
        let running = self.inner.status.snapshot().await.running;
        match active.as_ref() {
            Some(scan) if running => {
                scan.cancel.cancel();
                info!("scan cancellation requested");
                Ok(())
            }
            _ => Err(ScanError::NotRunning),
        }
    }

    /// Wait for the most recently started run to end. Returns immediately when there is none.
    pub async fn wait(&self) {
        let handle = self
            .inner
            .active
            .lock()
            .await
            .as_mut()
            .and_then(|scan| scan.handle.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scan task ended abnormally");
            }
        }
    }
}

async fn run(inner: Arc<Inner>, target: String, scope_id: ScopeId, cancel: CancellationToken) {
    let status = inner.status.clone();
    status
        .log(format!("Initializing Nmap scan on {target}..."))
        .await;

    // Run the pipeline in its own task so a panic surfaces as a JoinError
    // instead of leaving the run marked as active forever.
    let pipeline = tokio::spawn(execute(Arc::clone(&inner), target.clone(), scope_id, cancel));
    match pipeline.await {
        Ok(Ok(summary)) if summary.cancelled => {
            info!(%target, ?summary, "scan cancelled");
        }
        Ok(Ok(summary)) => {
            info!(%target, ?summary, "scan completed");
            status.log("Scan completed successfully!").await;
        }
        Ok(Err(e)) => {
            error!(%target, error = %e, "scan failed");
            status.log(format!("Scan error: {e}")).await;
        }
        Err(e) => {
            error!(%target, error = %e, "scan task panicked");
            status.log(format!("Scan error: {e}")).await;
        }
    }
    status.finish().await;
}

async fn execute(
    inner: Arc<Inner>,
    target: String,
    scope_id: ScopeId,
    cancel: CancellationToken,
) -> Result<RunSummary, ScanError> {
    let status = &inner.status;
    let mut summary = RunSummary::default();

    let mut rx = inner.prober.probe(&target, status, &cancel);
    let mut ports: Vec<OpenPort> = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                status.log("Scan cancelled.").await;
                summary.cancelled = true;
                return Ok(summary);
            }
            next = rx.recv() => match next {
                Some(port) => ports.push(port),
                None => break,
            },
        }
    }

    summary.open_ports = ports.len();
    status
        .log(format!("Scan finished. Found {} open ports.", ports.len()))
        .await;
    status.advance_to(PROBE_PROGRESS_CAP).await;

    for open in &ports {
        let plan = classify(open.port, &open.service);
        let Some(scheme) = plan.scheme() else {
            debug!(host = %open.host, port = open.port, service = %open.service, "not a web candidate");
            continue;
        };
        let url = format!("{scheme}://{}:{}", url_host(&open.host), open.port);
        status.log(format!("Probing {url}...")).await;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                status.log("Scan cancelled.").await;
                summary.cancelled = true;
                return Ok(summary);
            }
            outcome = inner.fetcher.fetch(&url) => outcome,
        };

        let meta = match outcome {
            FetchOutcome::Accepted(meta) => meta,
            FetchOutcome::Rejected(reason) => {
                debug!(%url, %reason, "not a web service");
                continue;
            }
        };

        let obs = Observation {
            scope_id,
            ip: &open.host,
            port: open.port,
            protocol: scheme,
            url: &url,
            title: meta.title.as_deref(),
            icon_path: meta.icon_path.as_deref(),
        };
        match upsert(inner.catalog.as_ref(), &obs, &now_rfc3339())? {
            UpsertOutcome::Created(id) => {
                info!(id, %url, "service discovered");
                summary.created += 1;
            }
            UpsertOutcome::Updated(id) => {
                debug!(id, %url, "service refreshed");
                summary.updated += 1;
            }
            UpsertOutcome::Locked(id) => {
                info!(id, %url, "service is locked; detection ignored");
                summary.locked += 1;
            }
        }
    }

    status.advance_to(100).await;
    status
        .log(format!(
            "Identified {} web services ({} new).",
            summary.created + summary.updated + summary.locked,
            summary.created
        ))
        .await;
    Ok(summary)
}

/// Host part of a URL authority; IPv6 literals need brackets.
fn url_host(host: &str) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}
