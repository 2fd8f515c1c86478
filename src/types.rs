use serde::{Deserialize, Serialize};
use ::time::{format_description::well_known, OffsetDateTime};

/// Catalog partition a service belongs to (a "profile" in the UI).
pub type ScopeId = i64;
pub type ServiceId = i64;

/// One open port reported by the port prober, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    /// Host the port was found on. For single-address targets this is the target itself.
    pub host: String,
    pub port: u16,
    /// Service name announced by the scanner, e.g. `http-proxy`. `unknown` when absent.
    pub service: String,
}

/// A persisted catalog entry. Identity is `(scope_id, ip, port)`.
///
/// `protocol`, `url`, `title` and `icon_url` are owned by the scanner until the
/// record is touched by a user, at which point `is_manual_lock` freezes them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub id: ServiceId,
    #[serde(rename = "profile_id")]
    pub scope_id: ScopeId,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    pub url: String,
    pub lan_url: Option<String>,
    pub wan_url: Option<String>,
    pub title: String,
    pub custom_name: Option<String>,
    pub icon_url: Option<String>,
    pub is_visible: bool,
    pub is_manual_lock: bool,
    pub last_scanned: String,
    pub sort_order: i64,
}

impl ServiceRecord {
    /// Name shown on the launch page.
    pub fn display_name(&self) -> &str {
        self.custom_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.title)
    }

    /// Apply a user edit. Any edit locks the scanner-owned fields.
    pub fn apply_edit(&mut self, edit: &ServiceEdit) {
        if let Some(v) = &edit.custom_name {
            self.custom_name = Some(v.clone());
        }
        if let Some(v) = &edit.icon_url {
            self.icon_url = Some(v.clone());
        }
        if let Some(v) = edit.is_visible {
            self.is_visible = v;
        }
        if let Some(v) = &edit.lan_url {
            self.lan_url = Some(v.clone());
        }
        if let Some(v) = &edit.wan_url {
            self.wan_url = Some(v.clone());
        }
        if let Some(v) = edit.sort_order {
            self.sort_order = v;
        }
        self.is_manual_lock = true;
    }
}

/// A record that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewService {
    pub scope_id: ScopeId,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    pub url: String,
    pub lan_url: Option<String>,
    pub wan_url: Option<String>,
    pub title: String,
    pub custom_name: Option<String>,
    pub icon_url: Option<String>,
    pub is_visible: bool,
    pub is_manual_lock: bool,
    pub last_scanned: String,
    pub sort_order: i64,
}

impl NewService {
    pub fn with_id(self, id: ServiceId) -> ServiceRecord {
        ServiceRecord {
            id,
            scope_id: self.scope_id,
            ip: self.ip,
            port: self.port,
            protocol: self.protocol,
            url: self.url,
            lan_url: self.lan_url,
            wan_url: self.wan_url,
            title: self.title,
            custom_name: self.custom_name,
            icon_url: self.icon_url,
            is_visible: self.is_visible,
            is_manual_lock: self.is_manual_lock,
            last_scanned: self.last_scanned,
            sort_order: self.sort_order,
        }
    }
}

/// Partial user edit of a catalog entry; `None` leaves a field untouched.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ServiceEdit {
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    #[serde(default)]
    pub lan_url: Option<String>,
    #[serde(default)]
    pub wan_url: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

/// Body of a manual "add service" request.
#[derive(Deserialize, Debug, Clone)]
pub struct ManualService {
    #[serde(default = "default_scope", rename = "profile_id")]
    pub scope_id: ScopeId,
    #[serde(default = "default_manual_ip")]
    pub ip: String,
    #[serde(default = "default_manual_port")]
    pub port: u16,
    #[serde(default = "default_manual_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub lan_url: Option<String>,
    #[serde(default)]
    pub wan_url: Option<String>,
    #[serde(default = "default_manual_title")]
    pub title: String,
    #[serde(default)]
    pub custom_name: Option<String>,
}

/// Manually added services sort ahead of discovered ones.
pub const MANUAL_SORT_ORDER: i64 = 100;

impl ManualService {
    pub fn into_new_service(self) -> NewService {
        NewService {
            scope_id: self.scope_id,
            ip: self.ip,
            port: self.port,
            protocol: self.protocol,
            url: self.url,
            lan_url: self.lan_url,
            wan_url: self.wan_url,
            title: self.title,
            custom_name: self.custom_name,
            icon_url: None,
            is_visible: true,
            is_manual_lock: true,
            last_scanned: now_rfc3339(),
            sort_order: MANUAL_SORT_ORDER,
        }
    }
}

pub fn default_scope() -> ScopeId {
    1
}

fn default_manual_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_manual_port() -> u16 {
    80
}

fn default_manual_protocol() -> String {
    "http".to_string()
}

fn default_manual_title() -> String {
    "Manual Service".to_string()
}

/// RFC3339 UTC timestamp used for `last_scanned`.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
