pub mod models;


use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use models::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
    labels: CategoryLabels,
}

impl Database {
    pub fn new(db_path: &Path, labels: CategoryLabels) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA cache_size=10000;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            labels,
        };

        // Initialize schema
        db.init_schema()?;

        Ok(db)
    }

    /// Sentinel labels this store was opened with.
    pub fn labels(&self) -> &CategoryLabels {
        &self.labels
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS podcasts (
                id TEXT NOT NULL,
                playlist_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                duration_minutes REAL,
                added_at TEXT,
                url TEXT,
                category TEXT NOT NULL DEFAULT '',
                show_name TEXT,
                processed_at TEXT DEFAULT (datetime('now')),
                PRIMARY KEY (id, playlist_id)
            );

            CREATE INDEX IF NOT EXISTS idx_podcasts_category ON podcasts(category);
            CREATE INDEX IF NOT EXISTS idx_podcasts_playlist ON podcasts(playlist_id);
            CREATE INDEX IF NOT EXISTS idx_podcasts_added ON podcasts(added_at DESC);

            CREATE TABLE IF NOT EXISTS playlists (
                id TEXT PRIMARY KEY,
                name TEXT,
                last_synced_at TEXT DEFAULT (datetime('now'))
            );
        "#,
        )?;

        Ok(())
    }

    // =========================================================================
    // Episode queries
    // =========================================================================

    /// True iff a row with the composite key is present.
    ///
    /// Errors propagate: a failed lookup must never read as "not found",
    /// since the sync pass would then insert a duplicate.
    pub fn exists(&self, episode_id: &str, playlist_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM podcasts WHERE id = ?1 AND playlist_id = ?2",
                params![episode_id, playlist_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Insert or fully replace the row for (id, playlist_id).
    ///
    /// Replace semantics include the category column, so re-storing a
    /// pending episode over a categorized one reverts it to pending.
    /// Sets processed_at to the current time.
    pub fn upsert_episode(&self, episode: &Episode) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO podcasts
                (id, playlist_id, title, description, duration_minutes,
                 added_at, url, category, show_name, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                episode.id,
                episode.playlist_id,
                episode.title,
                episode.description,
                episode.duration_minutes,
                episode.added_at,
                episode.url,
                episode.category.as_label(&self.labels),
                episode.show_name,
                now,
            ],
        )?;
        Ok(())
    }

    /// Mutate only the category column of one row.
    pub fn update_category(
        &self,
        episode_id: &str,
        playlist_id: &str,
        status: &CategoryStatus,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE podcasts SET category = ?1 WHERE id = ?2 AND playlist_id = ?3",
            params![status.as_label(&self.labels), episode_id, playlist_id],
        )?;
        Ok(())
    }

    /// Episodes still awaiting a category (pending or failed),
    /// most-recently-processed first.
    pub fn uncategorized_episodes(&self) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, playlist_id, title, description, duration_minutes,
                    added_at, url, category, show_name, processed_at
             FROM podcasts
             WHERE category IN (?1, ?2, '')
             ORDER BY processed_at DESC, rowid DESC",
        )?;

        let episodes = stmt
            .query_map(params![self.labels.pending, self.labels.failed], |row| {
                Ok(Episode {
                    id: row.get(0)?,
                    playlist_id: row.get(1)?,
                    title: row.get(2)?,
                    description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    duration_minutes: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    added_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    category: CategoryStatus::from_label(
                        &row.get::<_, String>(7)?,
                        &self.labels,
                    ),
                    show_name: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                    processed_at: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(episodes)
    }

    /// Distinct assigned categories, excluding the sentinel labels.
    /// Fed back into categorization prompts as reuse guidance.
    pub fn distinct_categories(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT category FROM podcasts
             WHERE category NOT IN (?1, ?2, '')
             ORDER BY category",
        )?;

        let categories = stmt
            .query_map(params![self.labels.pending, self.labels.failed], |row| {
                row.get(0)
            })?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(categories)
    }

    /// Full row set for the export routine, newest playlist addition first.
    pub fn episodes_for_export(&self, playlist_id: Option<&str>) -> Result<Vec<Episode>> {
        let conn = self.conn.lock().unwrap();

        let where_clause = if playlist_id.is_some() {
            "WHERE playlist_id = ?1"
        } else {
            ""
        };
        let sql = format!(
            "SELECT id, playlist_id, title, description, duration_minutes,
                    added_at, url, category, show_name, processed_at
             FROM podcasts {}
             ORDER BY added_at DESC",
            where_clause
        );

        let mut stmt = conn.prepare(&sql)?;
        let map_row = |row: &rusqlite::Row<'_>| {
            Ok(Episode {
                id: row.get(0)?,
                playlist_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                duration_minutes: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                added_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                category: CategoryStatus::from_label(&row.get::<_, String>(7)?, &self.labels),
                show_name: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                processed_at: row.get(9)?,
            })
        };

        let episodes = match playlist_id {
            Some(id) => stmt.query_map(params![id], map_row)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };

        Ok(episodes)
    }

    // =========================================================================
    // Playlist sync bookkeeping
    // =========================================================================

    /// Upsert the sync record for a playlist with the current timestamp.
    pub fn record_sync(&self, playlist_id: &str, playlist_name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR REPLACE INTO playlists (id, name, last_synced_at)
             VALUES (?1, ?2, ?3)",
            params![playlist_id, playlist_name, now],
        )?;
        Ok(())
    }

    pub fn last_synced_at(&self, playlist_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let ts: Option<String> = conn
            .query_row(
                "SELECT last_synced_at FROM playlists WHERE id = ?1",
                params![playlist_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts)
    }

    // =========================================================================
    // Stats and maintenance
    // =========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().unwrap();

        let total_episodes: i64 =
            conn.query_row("SELECT COUNT(*) FROM podcasts", [], |row| row.get(0))?;
        let total_categories: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT category) FROM podcasts
             WHERE category NOT IN (?1, ?2, '')",
            params![self.labels.pending, self.labels.failed],
            |row| row.get(0),
        )?;
        let uncategorized: i64 = conn.query_row(
            "SELECT COUNT(*) FROM podcasts WHERE category IN (?1, ?2, '')",
            params![self.labels.pending, self.labels.failed],
            |row| row.get(0),
        )?;
        let total_playlists: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT playlist_id) FROM podcasts",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) as count FROM podcasts
             WHERE category NOT IN (?1, ?2, '')
             GROUP BY category
             ORDER BY count DESC
             LIMIT 10",
        )?;
        let top_categories = stmt
            .query_map(params![self.labels.pending, self.labels.failed], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            total_episodes,
            total_categories,
            uncategorized,
            total_playlists,
            top_categories,
        })
    }

    /// Drop and recreate both tables. The only operation that deletes rows.
    pub fn reset(&self) -> Result<()> {
        {
            let conn = self.conn.lock().unwrap();
            conn.execute_batch(
                "DROP TABLE IF EXISTS podcasts;
                 DROP TABLE IF EXISTS playlists;",
            )?;
        }
        self.init_schema()?;
        log::info!("Database reset: all tables dropped and recreated");
        Ok(())
    }

    /// Rewrite every row's category to the pending sentinel without
    /// touching any other field. Returns the number of rows updated.
    pub fn reset_categories(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE podcasts SET category = ?1",
            params![self.labels.pending],
        )?;
        Ok(updated)
    }
}
