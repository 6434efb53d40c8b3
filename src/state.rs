//! Settings persistence - SQLite-backed credential store
//!
//! This module provides persistent storage for:
//! - Per-channel user settings rows (encrypted credential, exclusion lists)
//! - Per-purpose notification channel routing
//!
//! Every write is an upsert keyed by the row's primary key that only replaces
//! the columns the caller supplied, so concurrent saves of different fields
//! never clobber each other.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use thiserror::Error;
use tracing::{debug, info};

use crate::settings::{CredentialStore, Identity, Purpose, StoredRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt settings row: {0}")]
    Corrupt(String),

    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

/// SQLite implementation of [`CredentialStore`]
pub struct SqliteCredentialStore {
    conn: Mutex<Connection>,
}

impl SqliteCredentialStore {
    /// Open or create the settings database at a specific path
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;

        info!("Settings database opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            r#"
            -- One row per (community, channel, user); lists are JSON arrays
            CREATE TABLE IF NOT EXISTS user_settings (
                community_id TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                encrypted_credential TEXT,
                excluded_issues_repos TEXT,
                excluded_assign_repos TEXT,
                excluded_repos TEXT,
                notification_channel_id TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (community_id, channel_id, user_id)
            );

            -- Per-purpose notification routing
            CREATE TABLE IF NOT EXISTS notification_channels (
                community_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                purpose TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (community_id, user_id, purpose)
            );

            CREATE INDEX IF NOT EXISTS idx_settings_identity ON user_settings(community_id, user_id);
            "#,
        )?;

        debug!("Settings schema initialized");
        Ok(())
    }
}

fn encode_list(list: Option<&Vec<String>>) -> Result<Option<String>, StoreError> {
    list.map(|items| {
        serde_json::to_string(items)
            .map_err(|e| StoreError::Corrupt(format!("failed to encode list: {}", e)))
    })
    .transpose()
}

fn decode_list(raw: Option<String>) -> Result<Option<Vec<String>>, StoreError> {
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|e| StoreError::Corrupt(format!("invalid repository list {:?}: {}", text, e)))
    })
    .transpose()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {:?}: {}", raw, e)))
}

/// Raw column values before list and timestamp decoding
struct RawRecord {
    community_id: String,
    channel_id: String,
    user_id: String,
    encrypted_credential: Option<String>,
    excluded_issues: Option<String>,
    excluded_assign: Option<String>,
    excluded_legacy: Option<String>,
    notification_channel: Option<String>,
    updated_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            community_id: row.get(0)?,
            channel_id: row.get(1)?,
            user_id: row.get(2)?,
            encrypted_credential: row.get(3)?,
            excluded_issues: row.get(4)?,
            excluded_assign: row.get(5)?,
            excluded_legacy: row.get(6)?,
            notification_channel: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn decode(self) -> Result<StoredRecord, StoreError> {
        Ok(StoredRecord {
            identity: Identity::new(self.community_id, self.user_id),
            channel_id: self.channel_id,
            encrypted_credential: self.encrypted_credential,
            excluded_issues: decode_list(self.excluded_issues)?,
            excluded_assign: decode_list(self.excluded_assign)?,
            legacy_excluded: decode_list(self.excluded_legacy)?,
            notification_channel: self.notification_channel,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Partial-update upsert; `None` columns keep their stored values
fn upsert_record(conn: &Connection, record: &StoredRecord) -> Result<(), StoreError> {
    conn.execute(
        r#"
        INSERT INTO user_settings (
            community_id, channel_id, user_id, encrypted_credential,
            excluded_issues_repos, excluded_assign_repos, excluded_repos,
            notification_channel_id, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(community_id, channel_id, user_id) DO UPDATE SET
            encrypted_credential = COALESCE(excluded.encrypted_credential, user_settings.encrypted_credential),
            excluded_issues_repos = COALESCE(excluded.excluded_issues_repos, user_settings.excluded_issues_repos),
            excluded_assign_repos = COALESCE(excluded.excluded_assign_repos, user_settings.excluded_assign_repos),
            excluded_repos = COALESCE(excluded.excluded_repos, user_settings.excluded_repos),
            notification_channel_id = COALESCE(excluded.notification_channel_id, user_settings.notification_channel_id),
            updated_at = excluded.updated_at
        "#,
        params![
            record.identity.community_id,
            record.channel_id,
            record.identity.user_id,
            record.encrypted_credential,
            encode_list(record.excluded_issues.as_ref())?,
            encode_list(record.excluded_assign.as_ref())?,
            encode_list(record.legacy_excluded.as_ref())?,
            record.notification_channel,
            record.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

impl CredentialStore for SqliteCredentialStore {
    fn save(&self, record: &StoredRecord) -> Result<(), StoreError> {
        upsert_record(&*self.conn()?, record)?;

        debug!(
            "Saved settings row for {} in channel {}",
            record.identity, record.channel_id
        );
        Ok(())
    }

    fn find_all_for_identity(&self, identity: &Identity) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT community_id, channel_id, user_id, encrypted_credential,
                   excluded_issues_repos, excluded_assign_repos, excluded_repos,
                   notification_channel_id, updated_at
            FROM user_settings
            WHERE community_id = ?1 AND user_id = ?2
            ORDER BY channel_id
            "#,
        )?;

        let raw = stmt
            .query_map(
                params![identity.community_id, identity.user_id],
                RawRecord::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter().map(RawRecord::decode).collect()
    }

    fn save_notification_channel(
        &self,
        record: &StoredRecord,
        purposes: &[Purpose],
        target_channel: &str,
    ) -> Result<(), StoreError> {
        let identity = &record.identity;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for purpose in purposes {
            tx.execute(
                r#"
                INSERT INTO notification_channels (community_id, user_id, purpose, channel_id, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(community_id, user_id, purpose) DO UPDATE SET
                    channel_id = excluded.channel_id,
                    updated_at = excluded.updated_at
                "#,
                params![
                    identity.community_id,
                    identity.user_id,
                    purpose.as_str(),
                    target_channel,
                    record.updated_at.to_rfc3339(),
                ],
            )?;
        }
        upsert_record(&tx, record)?;
        tx.commit()?;

        debug!(
            "Routed {} notification channel(s) for {} to {}",
            purposes.len(),
            identity,
            target_channel
        );
        Ok(())
    }

    fn get_notification_channels(
        &self,
        identity: &Identity,
    ) -> Result<HashMap<Purpose, String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT purpose, channel_id
            FROM notification_channels
            WHERE community_id = ?1 AND user_id = ?2
            "#,
        )?;

        let rows = stmt
            .query_map(params![identity.community_id, identity.user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut channels = HashMap::new();
        for (purpose, channel_id) in rows {
            match Purpose::parse(&purpose) {
                Some(purpose) => {
                    channels.insert(purpose, channel_id);
                }
                None => debug!("Ignoring notification channel for unknown purpose {}", purpose),
            }
        }
        Ok(channels)
    }

    fn clear_notification_channels(&self, identity: &Identity) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM notification_channels WHERE community_id = ?1 AND user_id = ?2",
            params![identity.community_id, identity.user_id],
        )?;
        tx.execute(
            "UPDATE user_settings SET notification_channel_id = NULL WHERE community_id = ?1 AND user_id = ?2",
            params![identity.community_id, identity.user_id],
        )?;
        tx.commit()?;

        debug!("Cleared notification channels for {}", identity);
        Ok(())
    }
}
