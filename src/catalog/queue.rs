//! Replay queue of catalog-only tickets.
//!
//! Adding a ticket only records the path; nothing is decoded until the ticket
//! is replayed through the import pipeline.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::catalog::model::{self, CatalogTicket, IdentityId, TicketId};
use crate::{CatalogError, Result};

const PAGE_SIZE: i64 = 64;

const TICKET_COLUMNS: &str = "id, path, requested_at, resolved_at";

pub struct ReplayQueue {
    conn: Arc<Mutex<Connection>>,
}

impl ReplayQueue {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Records a catalog-only ticket. Only checks that the path is
    /// syntactically usable; the file itself is not touched.
    pub fn add(&self, path: impl AsRef<Path>) -> Result<CatalogTicket> {
        let path = absolute_ticket_path(path.as_ref())?;
        let requested_at = Utc::now();

        let conn = self.connection();
        conn.execute(
            "INSERT INTO catalog_tickets (path, requested_at) VALUES (?1, ?2)",
            params![path, model::to_millis(&requested_at)],
        )?;
        let id = TicketId(conn.last_insert_rowid());

        info!("Catalogued {} as {}", path, id);
        Ok(CatalogTicket {
            id,
            path: PathBuf::from(path),
            requested_at: model::from_millis(model::to_millis(&requested_at)),
            resolved_at: None,
        })
    }

    pub fn get(&self, id: TicketId) -> Result<Option<CatalogTicket>> {
        let ticket = self
            .connection()
            .query_row(
                &format!("SELECT {} FROM catalog_tickets WHERE id = ?1", TICKET_COLUMNS),
                [id.0],
                row_to_ticket,
            )
            .optional()?;
        Ok(ticket)
    }

    /// Lazily pages through unresolved tickets in id order. Each call starts
    /// from the beginning and nothing is consumed.
    pub fn pending_tickets(&self) -> PendingTickets {
        PendingTickets {
            conn: Arc::clone(&self.conn),
            after: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn pending_count(&self) -> Result<u64> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM catalog_tickets WHERE resolved_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Marks a ticket resolved. Returns `true` only for the call that performed
    /// the transition; resolving an already resolved ticket is a no-op.
    pub fn resolve(&self, id: TicketId) -> Result<bool> {
        resolve_ticket(&self.connection(), id, None)
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves a ticket on an open connection or transaction.
pub(crate) fn resolve_ticket(conn: &Connection, id: TicketId, identity: Option<IdentityId>) -> Result<bool> {
    let updated = conn.execute(
        "UPDATE catalog_tickets SET resolved_at = ?1, resolved_identity = ?2
         WHERE id = ?3 AND resolved_at IS NULL",
        params![model::to_millis(&Utc::now()), identity.map(|i| i.0), id.0],
    )?;
    if updated > 0 {
        debug!("Resolved {}", id);
        return Ok(true);
    }

    let known = conn
        .query_row("SELECT 1 FROM catalog_tickets WHERE id = ?1", [id.0], |_| Ok(()))
        .optional()?
        .is_some();
    if known {
        Ok(false)
    } else {
        Err(CatalogError::UnknownTicket(id))
    }
}

fn absolute_ticket_path(path: &Path) -> Result<String> {
    let text = path
        .to_str()
        .ok_or_else(|| CatalogError::InvalidPath(format!("{} is not valid UTF-8", path.display())))?;
    if text.trim().is_empty() {
        return Err(CatalogError::InvalidPath("empty path".into()));
    }
    if text.contains('\0') {
        return Err(CatalogError::InvalidPath(format!("{:?} contains a NUL byte", text)));
    }

    if path.is_absolute() {
        return Ok(text.to_string());
    }
    let joined = std::env::current_dir()?.join(path);
    joined
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| CatalogError::InvalidPath(format!("{} is not valid UTF-8", joined.display())))
}

fn row_to_ticket(row: &Row) -> rusqlite::Result<CatalogTicket> {
    Ok(CatalogTicket {
        id: TicketId(row.get(0)?),
        path: PathBuf::from(row.get::<_, String>(1)?),
        requested_at: model::from_millis(row.get(2)?),
        resolved_at: row.get::<_, Option<i64>>(3)?.map(model::from_millis),
    })
}

/// Iterator over pending tickets, fetched a page at a time.
pub struct PendingTickets {
    conn: Arc<Mutex<Connection>>,
    after: i64,
    buffer: VecDeque<CatalogTicket>,
    exhausted: bool,
}

impl PendingTickets {
    fn fetch_page(&mut self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM catalog_tickets
             WHERE resolved_at IS NULL AND id > ?1 ORDER BY id LIMIT ?2",
            TICKET_COLUMNS
        ))?;
        let page = stmt
            .query_map(params![self.after, PAGE_SIZE], row_to_ticket)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if (page.len() as i64) < PAGE_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = last.id.0;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for PendingTickets {
    type Item = Result<CatalogTicket>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
