#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use axum::serve::Listener;
use futures_util::{stream, StreamExt};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use homepage_scan_rs::catalog::{CatalogStore, SqliteCatalog};
use homepage_scan_rs::fetch::WebFetcher;
use homepage_scan_rs::icons::IconStore;
use homepage_scan_rs::orchestrator::ScanSupervisor;
use homepage_scan_rs::prober::PortProber;
use homepage_scan_rs::status::ScanStatus;
use homepage_scan_rs::types::OpenPort;

pub const ROUTER_PAGE: &str = r#"<!doctype html>
<html><head>
  <title> Router </title>
  <link rel="shortcut icon" href="/img/fav.png">
</head><body>admin</body></html>"#;

pub const FAVICON: &[u8] = b"\x89PNG-fake-icon";

/// Reports a fixed list of ports, one log line each.
pub struct StaticProber {
    pub ports: Vec<OpenPort>,
}

impl StaticProber {
    pub fn new(ports: Vec<OpenPort>) -> Self {
        Self { ports }
    }
}

impl PortProber for StaticProber {
    fn probe(
        &self,
        _target: &str,
        status: &ScanStatus,
        _cancel: &CancellationToken,
    ) -> mpsc::Receiver<OpenPort> {
        let (tx, rx) = mpsc::channel(16);
        let ports = self.ports.clone();
        let status = status.clone();
        tokio::spawn(async move {
            for port in ports {
                status.log(format!("Found: {}/tcp open {}", port.port, port.service)).await;
                status.bump_progress().await;
                if tx.send(port).await.is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Never reports anything; the channel closes only once the run is cancelled.
pub struct PendingProber;

impl PortProber for PendingProber {
    fn probe(
        &self,
        _target: &str,
        _status: &ScanStatus,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<OpenPort> {
        let (tx, rx) = mpsc::channel(1);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            drop(tx);
        });
        rx
    }
}

pub fn open_port(host: &str, port: u16, service: &str) -> OpenPort {
    OpenPort {
        host: host.to_string(),
        port,
        service: service.to_string(),
    }
}

pub struct Harness {
    pub scans: ScanSupervisor,
    pub catalog: Arc<SqliteCatalog>,
    pub icons: TempDir,
}

pub fn harness(prober: impl PortProber + 'static) -> Harness {
    let icons = tempfile::tempdir().unwrap();
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let store: Arc<dyn CatalogStore> = catalog.clone();
    let scans = ScanSupervisor::new(
        ScanStatus::new(),
        Arc::new(prober),
        fetcher(&icons),
        store,
    );
    Harness {
        scans,
        catalog,
        icons,
    }
}

pub fn fetcher(icons: &TempDir) -> WebFetcher {
    WebFetcher::new(
        Duration::from_secs(2),
        IconStore::new(icons.path(), "/static/icons"),
    )
    .unwrap()
}

/// Favicons above the fetcher's size cap.
pub const OVERSIZED_ICON_LEN: usize = 2 * 1024 * 1024;

/// Local stand-ins for LAN devices:
/// `/` a router admin page, `/img/fav.png` its icon, `/api` JSON,
/// `/boom` a server error, `/odd` a status above 599, `/bare` an HTML page
/// without a favicon anywhere, `/app/` a page with a relative icon href,
/// `/big` a page whose icon is oversized, `/endless` an HTML body that never ends.
pub async fn spawn_fixture() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { Html(ROUTER_PAGE) }))
        .route(
            "/img/fav.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], FAVICON) }),
        )
        .route(
            "/api",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/json")],
                    r#"{"html": "<title>x</title>"}"#,
                )
            }),
        )
        .route(
            "/boom",
            get(|| async { (StatusCode::BAD_GATEWAY, Html("<html><title>Bad</title></html>")) }),
        )
        .route(
            "/odd",
            get(|| async {
                let status = StatusCode::from_u16(600).unwrap();
                (status, Html("<html><title>Odd</title></html>"))
            }),
        )
        .route(
            "/bare",
            get(|| async { Html("<html><body><title>Bare</title></body></html>") }),
        )
        .route(
            "/app/",
            get(|| async {
                Html(r#"<html><head><title>App</title><link rel="icon" href="img/x.png"></head></html>"#)
            }),
        )
        .route(
            "/app/img/x.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], FAVICON) }),
        )
        .route(
            "/big",
            get(|| async {
                Html(r#"<html><title>Big</title><link rel="icon" href="/big.ico"></html>"#)
            }),
        )
        .route(
            "/big.ico",
            get(|| async { vec![0u8; OVERSIZED_ICON_LEN] }),
        )
        .route(
            "/endless",
            get(|| async {
                let head = stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(
                        b"<html><head><title>Endless</title></head><body>",
                    ))
                });
                let filler = stream::repeat_with(|| {
                    Ok::<_, std::io::Error>(Bytes::from(vec![b'x'; 64 * 1024]))
                });
                (
                    [(header::CONTENT_TYPE, "text/html")],
                    Body::from_stream(head.chain(filler)),
                )
            }),
        );
    serve(app).await
}

/// A device with no icon link whose origin still serves `/favicon.ico`.
pub async fn spawn_favicon_only_device() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { Html("<html><title>Printer</title></html>") }))
        .route(
            "/favicon.ico",
            get(|| async { ([(header::CONTENT_TYPE, "image/x-icon")], FAVICON) }),
        );
    serve(app).await
}

/// A device whose root answers JSON, so it never counts as a web page.
pub async fn spawn_json_device() -> SocketAddr {
    let app = Router::new().route(
        "/",
        get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{}").into_response() }),
    );
    serve(app).await
}

/// The router page again, over HTTPS with a throwaway self-signed certificate.
pub async fn spawn_tls_fixture() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { Html(ROUTER_PAGE) }))
        .route(
            "/img/fav.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], FAVICON) }),
        );

    let listener = TlsListener {
        inner: tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap(),
        acceptor: self_signed_acceptor(),
    };
    let addr = listener.inner.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn self_signed_acceptor() -> TlsAcceptor {
    let generated =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = generated.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

struct TlsListener {
    inner: tokio::net::TcpListener,
    acceptor: TlsAcceptor,
}

impl Listener for TlsListener {
    type Io = tokio_rustls::server::TlsStream<tokio::net::TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let Ok((tcp, addr)) = self.inner.accept().await else {
                continue;
            };
            // Failed handshakes only affect that one client.
            if let Ok(tls) = self.acceptor.accept(tcp).await {
                return (tls, addr);
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
