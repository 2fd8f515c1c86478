use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::icons::IconStore;

/// Only the head of a page is inspected for a title and icon links.
const MAX_INSPECTED_BYTES: usize = 512 * 1024;

/// Favicons larger than this are not saved.
const MAX_ICON_BYTES: usize = 1024 * 1024;

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<html[\s>/]").expect("valid regex"));
static TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title(?:\s[^>]*)?>(.*?)</title\s*>").expect("valid regex"));
static OPEN_TITLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<title[\s>/]").expect("valid regex"));
static LINK_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid regex"));
static ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid regex")
});

/// Why a candidate port was not accepted as a web service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Request(String),
    #[error("server error status {0}")]
    ServerError(u16),
    #[error("content type {0:?} is not html or text")]
    NotHtml(String),
    #[error("body is not an html document")]
    NotADocument,
}

impl From<reqwest::Error> for RejectReason {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RejectReason::Timeout
        } else {
            RejectReason::Request(e.to_string())
        }
    }
}

/// Metadata extracted from an accepted page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    /// Trimmed `<title>` text; `None` when missing or blank.
    pub title: Option<String>,
    /// Servable path of the saved favicon.
    pub icon_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Accepted(PageMeta),
    Rejected(RejectReason),
}

/// Issues bounded-timeout GETs against candidate ports and validates the answer is a web page.
///
/// Certificate validation is off: home-network appliances mostly present self-signed certs.
#[derive(Debug, Clone)]
pub struct WebFetcher {
    client: Client,
    icons: IconStore,
}

impl WebFetcher {
    pub fn new(timeout: Duration, icons: IconStore) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(Policy::limited(5))
            // LAN hosts are always reached directly.
            .no_proxy()
            .user_agent(concat!("homepage-scan-rs/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;
        Ok(Self { client, icons })
    }

    /// Probe `url`. Never fails: anything that is not a plausible HTML page is a rejection.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        match self.fetch_page(url).await {
            Ok(meta) => FetchOutcome::Accepted(meta),
            Err(reason) => FetchOutcome::Rejected(reason),
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<PageMeta, RejectReason> {
        let parsed = Url::parse(url).map_err(|e| RejectReason::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| RejectReason::InvalidUrl(format!("{url} has no host")))?
            .to_string();
        let port = parsed.port_or_known_default().unwrap_or(0);

        let mut resp = self.client.get(parsed).send().await?;
        let status = resp.status();
        if status.as_u16() >= 500 {
            return Err(RejectReason::ServerError(status.as_u16()));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("html") && !content_type.contains("text") {
            return Err(RejectReason::NotHtml(content_type));
        }

        let base = resp.url().clone();
        let (head, _) = read_limited(&mut resp, MAX_INSPECTED_BYTES).await?;
        let body = String::from_utf8_lossy(&head);
        let doc = inspect_document(&body).ok_or(RejectReason::NotADocument)?;

        let icon_url = doc
            .icon_href
            .as_deref()
            .and_then(|href| base.join(href).ok())
            .or_else(|| base.join("/favicon.ico").ok());
        let icon_path = match icon_url {
            Some(icon_url) => self.download_icon(&icon_url, &host, port).await,
            None => None,
        };

        Ok(PageMeta {
            title: doc.title,
            icon_path,
        })
    }

    /// Download and persist a favicon. Failures are logged and swallowed.
    async fn download_icon(&self, icon_url: &Url, host: &str, port: u16) -> Option<String> {
        let mut resp = match self.client.get(icon_url.clone()).send().await {
            Ok(resp) => resp,
            Err(e) => {
                debug!(url = %icon_url, error = %e, "favicon request failed");
                return None;
            }
        };
        if resp.status() != StatusCode::OK {
            debug!(url = %icon_url, status = %resp.status(), "no favicon");
            return None;
        }
        let bytes = match read_limited(&mut resp, MAX_ICON_BYTES).await {
            Ok((_, true)) => {
                debug!(url = %icon_url, limit = MAX_ICON_BYTES, "favicon too large");
                return None;
            }
            Ok((b, false)) => b,
            Err(e) => {
                debug!(url = %icon_url, error = %e, "favicon body failed");
                return None;
            }
        };
        match self.icons.save(host, port, icon_url, &bytes).await {
            Ok(path) => Some(path),
            Err(e) => {
                debug!(url = %icon_url, error = %e, "favicon save failed");
                None
            }
        }
    }
}

/// Read at most `limit` bytes of the body; the flag is set when the body was longer.
async fn read_limited(
    resp: &mut reqwest::Response,
    limit: usize,
) -> reqwest::Result<(Vec<u8>, bool)> {
    let mut buf = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        let room = limit - buf.len();
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, false))
}

/// What was found in an HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentInfo {
    pub title: Option<String>,
    /// `href` of the first `<link>` whose `rel` mentions "icon".
    pub icon_href: Option<String>,
}

/// Returns `None` when the body has neither an `<html>` nor a `<title>` element.
pub fn inspect_document(body: &str) -> Option<DocumentInfo> {
    if !HTML_TAG.is_match(body) && !OPEN_TITLE.is_match(body) {
        return None;
    }

    let title = TITLE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|t| !t.is_empty());

    let icon_href = LINK_TAG
        .find_iter(body)
        .find(|tag| {
            attribute(tag.as_str(), "rel")
                .map(|rel| rel.to_ascii_lowercase().contains("icon"))
                .unwrap_or(false)
        })
        .and_then(|tag| attribute(tag.as_str(), "href"))
        .map(|href| decode_entities(href.trim()))
        .filter(|href| !href.is_empty());

    Some(DocumentInfo { title, icon_href })
}

fn attribute(tag: &str, name: &str) -> Option<String> {
    ATTR.captures_iter(tag)
        .find(|c| c[1].eq_ignore_ascii_case(name))
        .and_then(|c| c.get(2).or_else(|| c.get(3)).or_else(|| c.get(4)))
        .map(|m| m.as_str().to_string())
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
