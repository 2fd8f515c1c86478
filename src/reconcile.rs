//! Merges freshly probed metadata into the catalog.
//!
//! Rules, per `(scope, ip, port)`:
//! - unknown service: insert with detected fields, `lan_url` = detected URL,
//!   visible, unlocked, title `Port {port}` when the page had none;
//! - known and unlocked: overwrite protocol and URL, the title only when a
//!   non-empty one was found, the icon only when a new one was saved;
//! - known and manually locked: leave the record alone.

use crate::catalog::{CatalogStore, Result};
use crate::types::{NewService, ScopeId, ServiceId};

/// One accepted web probe.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub scope_id: ScopeId,
    pub ip: &'a str,
    pub port: u16,
    pub protocol: &'a str,
    pub url: &'a str,
    pub title: Option<&'a str>,
    pub icon_path: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(ServiceId),
    Updated(ServiceId),
    /// Record exists but a user edit froze it.
    Locked(ServiceId),
}

pub fn upsert(
    store: &dyn CatalogStore,
    obs: &Observation<'_>,
    scanned_at: &str,
) -> Result<UpsertOutcome> {
    let title = obs.title.map(str::trim).filter(|t| !t.is_empty());

    let Some(mut existing) = store.find(obs.scope_id, obs.ip, obs.port)? else {
        let created = store.insert(&NewService {
            scope_id: obs.scope_id,
            ip: obs.ip.to_string(),
            port: obs.port,
            protocol: obs.protocol.to_string(),
            url: obs.url.to_string(),
            lan_url: Some(obs.url.to_string()),
            wan_url: None,
            title: title
                .map(str::to_string)
                .unwrap_or_else(|| format!("Port {}", obs.port)),
            custom_name: None,
            icon_url: obs.icon_path.map(str::to_string),
            is_visible: true,
            is_manual_lock: false,
            last_scanned: scanned_at.to_string(),
            sort_order: 0,
        })?;
        return Ok(UpsertOutcome::Created(created.id));
    };

    if existing.is_manual_lock {
        return Ok(UpsertOutcome::Locked(existing.id));
    }

    existing.protocol = obs.protocol.to_string();
    existing.url = obs.url.to_string();
    if let Some(title) = title {
        existing.title = title.to_string();
    }
    if let Some(icon) = obs.icon_path {
        existing.icon_url = Some(icon.to_string());
    }
    existing.last_scanned = scanned_at.to_string();
    store.update(&existing)?;
    Ok(UpsertOutcome::Updated(existing.id))
}
