use std::io;
use std::path::{Path, PathBuf};

use url::Url;

/// Where favicons are written and the URL prefix they are served under.
#[derive(Debug, Clone)]
pub struct IconStore {
    dir: PathBuf,
    url_prefix: String,
}

impl IconStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a favicon downloaded from `icon_url` for `host:port`.
    /// Returns the servable path, e.g. `/static/icons/192.168.1.2_80_favicon.ico`.
    pub async fn save(
        &self,
        host: &str,
        port: u16,
        icon_url: &Url,
        bytes: &[u8],
    ) -> io::Result<String> {
        let name = icon_file_name(host, port, icon_url);
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        Ok(format!("{}/{}", self.url_prefix.trim_end_matches('/'), name))
    }
}

/// `{host}_{port}_{basename}` with everything but `[A-Za-z0-9._-]` removed.
pub fn icon_file_name(host: &str, port: u16, icon_url: &Url) -> String {
    let base = icon_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("favicon.ico");
    sanitize_file_name(&format!("{host}_{port}_{base}"))
}

pub fn sanitize_file_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}
