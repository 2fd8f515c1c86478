//! Persistent service catalog.
//!
//! `CatalogStore` is the seam the engine writes through; every call commits on
//! its own so a crash mid-scan leaves already-reconciled services durable.
//! `SqliteCatalog` is the shipped implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use crate::error::CatalogError;
use crate::types::{NewService, ScopeId, ServiceId, ServiceRecord};

pub type Result<T> = std::result::Result<T, CatalogError>;

pub trait CatalogStore: Send + Sync {
    fn find(&self, scope_id: ScopeId, ip: &str, port: u16) -> Result<Option<ServiceRecord>>;
    fn get(&self, id: ServiceId) -> Result<Option<ServiceRecord>>;
    fn insert(&self, service: &NewService) -> Result<ServiceRecord>;
    fn update(&self, record: &ServiceRecord) -> Result<()>;
    fn delete(&self, id: ServiceId) -> Result<()>;
    /// Visible services of a scope, highest `sort_order` first, then by port.
    fn list_visible(&self, scope_id: ScopeId) -> Result<Vec<ServiceRecord>>;
    /// Rank `ordered_ids` so the first id sorts first. Unknown ids are ignored.
    fn reorder(&self, ordered_ids: &[ServiceId]) -> Result<usize>;
}

const MIG_0001_INIT: &str = r#"
BEGIN;

CREATE TABLE services (
  id              INTEGER PRIMARY KEY AUTOINCREMENT,
  profile_id      INTEGER NOT NULL,
  ip              TEXT NOT NULL,
  port            INTEGER NOT NULL CHECK (port BETWEEN 0 AND 65535),
  protocol        TEXT NOT NULL,
  url             TEXT NOT NULL,
  lan_url         TEXT,
  wan_url         TEXT,
  title           TEXT NOT NULL DEFAULT '',
  custom_name     TEXT,
  icon_url        TEXT,
  is_visible      INTEGER NOT NULL CHECK (is_visible IN (0,1)) DEFAULT 1,
  is_manual_lock  INTEGER NOT NULL CHECK (is_manual_lock IN (0,1)) DEFAULT 0,
  last_scanned    TEXT NOT NULL,
  sort_order      INTEGER NOT NULL DEFAULT 0,
  UNIQUE (profile_id, ip, port)
);

CREATE INDEX idx_services_profile ON services(profile_id, is_visible);

COMMIT;
"#;

const COLUMNS: &str = "id, profile_id, ip, port, protocol, url, lan_url, wan_url, title, \
     custom_name, icon_url, is_visible, is_manual_lock, last_scanned, sort_order";

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
}

impl SqliteCatalog {
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| CatalogError::Poisoned)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    let exists: i64 = conn.query_row(
        "SELECT COUNT(1) FROM sqlite_master WHERE type='table' AND name='services'",
        [],
        |r| r.get(0),
    )?;
    if exists == 0 {
        conn.execute_batch(MIG_0001_INIT)?;
    }
    Ok(())
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ServiceRecord> {
    Ok(ServiceRecord {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        ip: row.get(2)?,
        port: row.get(3)?,
        protocol: row.get(4)?,
        url: row.get(5)?,
        lan_url: row.get(6)?,
        wan_url: row.get(7)?,
        title: row.get(8)?,
        custom_name: row.get(9)?,
        icon_url: row.get(10)?,
        is_visible: row.get(11)?,
        is_manual_lock: row.get(12)?,
        last_scanned: row.get(13)?,
        sort_order: row.get(14)?,
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

impl CatalogStore for SqliteCatalog {
    fn find(&self, scope_id: ScopeId, ip: &str, port: u16) -> Result<Option<ServiceRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {COLUMNS} FROM services WHERE profile_id=? AND ip=? AND port=?");
        Ok(conn
            .query_row(&sql, params![scope_id, ip, port], from_row)
            .optional()?)
    }

    fn get(&self, id: ServiceId) -> Result<Option<ServiceRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {COLUMNS} FROM services WHERE id=?");
        Ok(conn.query_row(&sql, [id], from_row).optional()?)
    }

    fn insert(&self, s: &NewService) -> Result<ServiceRecord> {
        let conn = self.conn()?;
        let res = conn.execute(
            "INSERT INTO services(profile_id, ip, port, protocol, url, lan_url, wan_url, title, custom_name, icon_url, is_visible, is_manual_lock, last_scanned, sort_order)
             VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
            params![
                s.scope_id,
                s.ip,
                s.port,
                s.protocol,
                s.url,
                s.lan_url,
                s.wan_url,
                s.title,
                s.custom_name,
                s.icon_url,
                s.is_visible,
                s.is_manual_lock,
                s.last_scanned,
                s.sort_order
            ],
        );
        match res {
            Ok(_) => Ok(s.clone().with_id(conn.last_insert_rowid())),
            Err(e) if is_unique_violation(&e) => Err(CatalogError::Duplicate {
                scope_id: s.scope_id,
                ip: s.ip.clone(),
                port: s.port,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, r: &ServiceRecord) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE services SET protocol=?, url=?, lan_url=?, wan_url=?, title=?, custom_name=?, icon_url=?, is_visible=?, is_manual_lock=?, last_scanned=?, sort_order=? WHERE id=?",
            params![
                r.protocol,
                r.url,
                r.lan_url,
                r.wan_url,
                r.title,
                r.custom_name,
                r.icon_url,
                r.is_visible,
                r.is_manual_lock,
                r.last_scanned,
                r.sort_order,
                r.id
            ],
        )?;
        if changed == 0 {
            return Err(CatalogError::NotFound(r.id));
        }
        Ok(())
    }

    fn delete(&self, id: ServiceId) -> Result<()> {
        let conn = self.conn()?;
        if conn.execute("DELETE FROM services WHERE id=?", [id])? == 0 {
            return Err(CatalogError::NotFound(id));
        }
        Ok(())
    }

    fn list_visible(&self, scope_id: ScopeId) -> Result<Vec<ServiceRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {COLUMNS} FROM services WHERE profile_id=? AND is_visible=1 ORDER BY sort_order DESC, port ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([scope_id], from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn reorder(&self, ordered_ids: &[ServiceId]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let total = ordered_ids.len() as i64;
        for (index, id) in ordered_ids.iter().enumerate() {
            tx.execute(
                "UPDATE services SET sort_order=? WHERE id=?",
                params![total - index as i64, id],
            )?;
        }
        tx.commit()?;
        Ok(ordered_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_rfc3339;

    fn service(scope_id: ScopeId, port: u16) -> NewService {
        NewService {
            scope_id,
            ip: "192.168.1.2".into(),
            port,
            protocol: "http".into(),
            url: format!("http://192.168.1.2:{port}"),
            lan_url: None,
            wan_url: None,
            title: format!("Port {port}"),
            custom_name: None,
            icon_url: None,
            is_visible: true,
            is_manual_lock: false,
            last_scanned: now_rfc3339(),
            sort_order: 0,
        }
    }

    #[test]
    fn insert_find_roundtrip() {
        let db = SqliteCatalog::open_in_memory().unwrap();
        let created = db.insert(&service(1, 8080)).unwrap();
        let found = db.find(1, "192.168.1.2", 8080).unwrap().unwrap();
        assert_eq!(found, created);
        assert!(db.find(2, "192.168.1.2", 8080).unwrap().is_none());
    }

    #[test]
    fn identity_is_unique_per_scope() {
        let db = SqliteCatalog::open_in_memory().unwrap();
        db.insert(&service(1, 80)).unwrap();
        db.insert(&service(2, 80)).unwrap();
        let err = db.insert(&service(1, 80)).unwrap_err();
        assert!(matches!(err, CatalogError::Duplicate { port: 80, .. }));
    }

    #[test]
    fn list_orders_by_rank_then_port_and_hides_invisible() {
        let db = SqliteCatalog::open_in_memory().unwrap();
        let a = db.insert(&service(1, 9000)).unwrap();
        let b = db.insert(&service(1, 80)).unwrap();
        let mut hidden = db.insert(&service(1, 3000)).unwrap();
        hidden.is_visible = false;
        db.update(&hidden).unwrap();
        db.insert(&service(2, 22)).unwrap();

        let ports: Vec<u16> = db.list_visible(1).unwrap().iter().map(|s| s.port).collect();
        assert_eq!(ports, vec![80, 9000]);

        db.reorder(&[a.id, b.id]).unwrap();
        let ports: Vec<u16> = db.list_visible(1).unwrap().iter().map(|s| s.port).collect();
        assert_eq!(ports, vec![9000, 80]);
    }

    #[test]
    fn delete_and_update_missing_rows() {
        let db = SqliteCatalog::open_in_memory().unwrap();
        let rec = db.insert(&service(1, 80)).unwrap();
        db.delete(rec.id).unwrap();
        assert!(matches!(db.delete(rec.id), Err(CatalogError::NotFound(_))));
        assert!(matches!(db.update(&rec), Err(CatalogError::NotFound(_))));
        assert!(db.get(rec.id).unwrap().is_none());
    }

    #[test]
    fn reopening_a_file_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("services.db");
        {
            let db = SqliteCatalog::open_or_create(&path).unwrap();
            db.insert(&service(1, 443)).unwrap();
        }
        let db = SqliteCatalog::open_or_create(&path).unwrap();
        assert!(db.find(1, "192.168.1.2", 443).unwrap().is_some());
    }
}
