//! Persisted catalog storage.
//!
//! The collector only needs a snapshot to seed from and a place to write the
//! merged result, so the boundary is the small [`CatalogStore`] trait. The
//! SQLite implementation also answers the catalog-wide queries used by
//! refresh analysis, the report binary and the JSON export.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::StoreError;
use crate::models::{CanonicalSong, Identifier};

/// Persisted catalog, keyed by target performer.
pub trait CatalogStore {
    /// Stored songs for `target`; empty when the performer was never saved.
    fn load(&self, target: &str) -> Result<Vec<CanonicalSong>, StoreError>;

    /// Replace everything stored for `target` with `songs`.
    fn save(
        &mut self,
        target: &str,
        songs: &[CanonicalSong],
        catalog_version: u32,
    ) -> Result<(), StoreError>;
}

/// One stored performer, without its songs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSummary {
    pub name: String,
    pub song_count: usize,
    pub updated_at: DateTime<Utc>,
    pub catalog_version: u32,
}

/// Catalog-wide counts for the report binary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogReport {
    pub performers: usize,
    pub songs: usize,
    pub identifiers: usize,
    pub duplicate_titles: usize,
    pub top_partitions: Vec<(String, usize)>,
    pub top_performers: Vec<(String, usize)>,
}

const REPORT_TOP_N: usize = 10;

// ============================================================================
// SQLite Store
// ============================================================================

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS targets (
        name TEXT PRIMARY KEY,
        song_count INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        catalog_version INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS songs (
        id INTEGER PRIMARY KEY,
        target TEXT NOT NULL REFERENCES targets(name) ON DELETE CASCADE,
        title TEXT NOT NULL,
        performer TEXT NOT NULL,
        language TEXT,
        UNIQUE (target, title, performer)
    );

    CREATE TABLE IF NOT EXISTS song_codes (
        song_id INTEGER NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        partition TEXT NOT NULL,
        code TEXT NOT NULL,
        PRIMARY KEY (song_id, position)
    );

    CREATE INDEX IF NOT EXISTS idx_songs_target ON songs(target);
    CREATE INDEX IF NOT EXISTS idx_song_codes_partition ON song_codes(partition);
";

pub struct SqliteCatalogStore {
    conn: Connection,
}

impl SqliteCatalogStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Every stored performer, by name.
    pub fn summaries(&self) -> Result<Vec<TargetSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, song_count, updated_at, catalog_version FROM targets ORDER BY name",
        )?;
        let rows = stmt.query_map([], |row| {
            let updated_at: String = row.get(2)?;
            Ok(TargetSummary {
                name: row.get(0)?,
                song_count: row.get::<_, i64>(1)? as usize,
                updated_at: parse_timestamp(&updated_at, 2)?,
                catalog_version: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn summary(&self, target: &str) -> Result<Option<TargetSummary>, StoreError> {
        let summary = self
            .conn
            .query_row(
                "SELECT name, song_count, updated_at, catalog_version FROM targets WHERE name = ?1",
                [target],
                |row| {
                    let updated_at: String = row.get(2)?;
                    Ok(TargetSummary {
                        name: row.get(0)?,
                        song_count: row.get::<_, i64>(1)? as usize,
                        updated_at: parse_timestamp(&updated_at, 2)?,
                        catalog_version: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    pub fn report(&self) -> Result<CatalogReport, StoreError> {
        let count = |sql: &str| -> Result<usize, StoreError> {
            Ok(self.conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as usize)
        };
        let top = |sql: &str| -> Result<Vec<(String, usize)>, StoreError> {
            let mut stmt = self.conn.prepare(sql)?;
            let rows = stmt.query_map([REPORT_TOP_N as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        };

        Ok(CatalogReport {
            performers: count("SELECT COUNT(*) FROM targets")?,
            songs: count("SELECT COUNT(*) FROM songs")?,
            identifiers: count("SELECT COUNT(*) FROM song_codes")?,
            duplicate_titles: count(
                "SELECT COUNT(*) FROM (SELECT title FROM songs GROUP BY title HAVING COUNT(*) > 1)",
            )?,
            top_partitions: top(
                "SELECT partition, COUNT(*) AS n FROM song_codes
                 GROUP BY partition ORDER BY n DESC, partition LIMIT ?1",
            )?,
            top_performers: top(
                "SELECT name, song_count FROM targets
                 ORDER BY song_count DESC, name LIMIT ?1",
            )?,
        })
    }

    /// Write the whole catalog as one JSON object keyed by performer.
    /// Returns the number of performers written.
    pub fn export_json(&self, path: &Path) -> Result<usize, StoreError> {
        let mut catalog: BTreeMap<String, ExportedTarget> = BTreeMap::new();
        for summary in self.summaries()? {
            let songs = self.load(&summary.name)?;
            catalog.insert(
                summary.name.clone(),
                ExportedTarget {
                    name: summary.name,
                    song_count: summary.song_count,
                    updated_at: summary.updated_at,
                    songs,
                },
            );
        }

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &catalog)?;
        writer.flush()?;
        Ok(catalog.len())
    }
}

#[derive(Serialize)]
struct ExportedTarget {
    name: String,
    song_count: usize,
    updated_at: DateTime<Utc>,
    songs: Vec<CanonicalSong>,
}

fn parse_timestamp(text: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

impl CatalogStore for SqliteCatalogStore {
    fn load(&self, target: &str) -> Result<Vec<CanonicalSong>, StoreError> {
        let mut songs_stmt = self.conn.prepare_cached(
            "SELECT id, title, performer, language FROM songs
             WHERE target = ?1 ORDER BY title, performer",
        )?;
        let mut codes_stmt = self.conn.prepare_cached(
            "SELECT partition, code FROM song_codes WHERE song_id = ?1 ORDER BY position",
        )?;

        let rows = songs_stmt.query_map([target], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut songs = Vec::new();
        for row in rows {
            let (id, title, performer, language) = row?;
            let identifiers = codes_stmt
                .query_map([id], |r| {
                    Ok(Identifier::new(
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            songs.push(CanonicalSong {
                title,
                performer,
                language,
                identifiers,
            });
        }
        Ok(songs)
    }

    fn save(
        &mut self,
        target: &str,
        songs: &[CanonicalSong],
        catalog_version: u32,
    ) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        {
            tx.execute(
                "DELETE FROM song_codes WHERE song_id IN (SELECT id FROM songs WHERE target = ?1)",
                [target],
            )?;
            tx.execute("DELETE FROM songs WHERE target = ?1", [target])?;
            tx.execute(
                "INSERT INTO targets (name, song_count, updated_at, catalog_version)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    song_count = excluded.song_count,
                    updated_at = excluded.updated_at,
                    catalog_version = excluded.catalog_version",
                params![target, songs.len() as i64, Utc::now().to_rfc3339(), catalog_version],
            )?;

            let mut song_stmt = tx.prepare_cached(
                "INSERT INTO songs (target, title, performer, language) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut code_stmt = tx.prepare_cached(
                "INSERT INTO song_codes (song_id, position, partition, code)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;

            for song in songs {
                song_stmt.execute(params![target, song.title, song.performer, song.language])?;
                let song_id = tx.last_insert_rowid();
                for (position, id) in song.identifiers.iter().enumerate() {
                    code_stmt.execute(params![song_id, position as i64, id.partition, id.code])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

// ============================================================================
// In-memory Store
// ============================================================================

/// Map-backed store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    targets: FxHashMap<String, Vec<CanonicalSong>>,
}

impl CatalogStore for MemoryCatalogStore {
    fn load(&self, target: &str) -> Result<Vec<CanonicalSong>, StoreError> {
        Ok(self.targets.get(target).cloned().unwrap_or_default())
    }

    fn save(
        &mut self,
        target: &str,
        songs: &[CanonicalSong],
        _catalog_version: u32,
    ) -> Result<(), StoreError> {
        self.targets.insert(target.to_string(), songs.to_vec());
        Ok(())
    }
}
