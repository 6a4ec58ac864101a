//! Sync and backfill orchestration.
//!
//! A sync pass walks one playlist: fetch -> filter against the store ->
//! categorize the new batch -> persist -> record the sync timestamp.
//! A backfill pass re-attempts categorization for rows still pending.
//! Categorization is best-effort throughout; ingestion is the part that
//! must complete.

use crate::categorizer::Categorizer;
use crate::database::{CategoryStatus, Database, Episode};
use crate::error::AppError;
use crate::spotify::PlaylistSource;

/// Outcome of one playlist pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub playlist_name: String,
    pub processed: usize,
    pub skipped: usize,
}

/// Outcome of one backfill pass.
#[derive(Debug, Default)]
pub struct BackfillReport {
    pub attempted: usize,
    pub updated: usize,
}

/// One incremental pass over a playlist.
///
/// A store or playlist-level failure aborts the pass before the sync date
/// is touched; a single episode's fetch failure only skips that episode.
pub async fn sync_playlist(
    source: &dyn PlaylistSource,
    db: &Database,
    categorizer: &mut dyn Categorizer,
    playlist_id: &str,
) -> Result<SyncReport, AppError> {
    let playlist = source
        .playlist(playlist_id)
        .await
        .map_err(AppError::Spotify)?;
    log::info!("Syncing playlist: {}", playlist.name);

    let items = source
        .playlist_items(playlist_id)
        .await
        .map_err(AppError::Spotify)?;

    let mut pending: Vec<Episode> = Vec::new();
    let mut skipped = 0usize;

    for item in &items {
        let episode_id = match item.episode_id() {
            Some(id) => id,
            None => continue,
        };

        // Dedup against the store. Lookup errors abort the pass: treating
        // a failed check as "new" would insert duplicate rows.
        if db.exists(episode_id, playlist_id)? {
            skipped += 1;
            continue;
        }

        let detail = match source.episode(episode_id).await {
            Ok(detail) => detail,
            Err(e) => {
                log::error!("Failed to fetch episode {}: {}", episode_id, e);
                continue;
            }
        };

        pending.push(Episode {
            id: episode_id.to_string(),
            playlist_id: playlist_id.to_string(),
            title: if detail.name.is_empty() {
                "Untitled".to_string()
            } else {
                detail.name.clone()
            },
            description: detail.best_description().to_string(),
            duration_minutes: detail.duration_minutes(),
            added_at: item.added_at.clone().unwrap_or_default(),
            url: detail.external_urls.spotify.clone().unwrap_or_default(),
            show_name: detail
                .show
                .name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            category: CategoryStatus::Pending,
            processed_at: None,
        });
    }

    if !pending.is_empty() {
        let existing = db.distinct_categories()?;
        log::info!(
            "Categorizing {} new episodes ({} existing categories as guidance)",
            pending.len(),
            existing.len()
        );
        let assignments = categorizer.categorize_batch(&pending, &existing).await;
        for ep in pending.iter_mut() {
            // Episodes the service skipped stay pending for a later backfill.
            if let Some(status) = assignments.get(&ep.id) {
                ep.category = status.clone();
            }
        }
    }

    let mut processed = 0usize;
    for ep in &pending {
        db.upsert_episode(ep)?;
        processed += 1;
        log::info!(
            "Stored: {} [{}]",
            ep.title,
            ep.category.as_label(db.labels())
        );
    }

    db.record_sync(playlist_id, &playlist.name)?;
    log::info!(
        "Sync complete: {} new, {} already stored",
        processed,
        skipped
    );

    Ok(SyncReport {
        playlist_name: playlist.name,
        processed,
        skipped,
    })
}

/// Re-attempt categorization for stored episodes still pending or failed.
///
/// Episodes absent from the returned mapping keep their state and are
/// retried on the next invocation.
pub async fn backfill_pending(
    db: &Database,
    categorizer: &mut dyn Categorizer,
) -> Result<BackfillReport, AppError> {
    if !categorizer.is_enabled() {
        log::info!("Categorization disabled, skipping backfill");
        return Ok(BackfillReport::default());
    }
    if categorizer.quota_exhausted() {
        log::info!("Skipping backfill: categorization quota exhausted this run");
        return Ok(BackfillReport::default());
    }

    let pending = db.uncategorized_episodes()?;
    if pending.is_empty() {
        log::info!("No episodes awaiting categorization");
        return Ok(BackfillReport::default());
    }

    log::info!("Backfilling categories for {} episodes", pending.len());
    let existing = db.distinct_categories()?;
    let assignments = categorizer.categorize_batch(&pending, &existing).await;

    let mut updated = 0usize;
    for ep in &pending {
        let status = match assignments.get(&ep.id) {
            Some(status) => status,
            None => continue,
        };
        match db.update_category(&ep.id, &ep.playlist_id, status) {
            Ok(()) => {
                updated += 1;
                log::info!(
                    "Categorized: {} -> {}",
                    ep.title,
                    status.as_label(db.labels())
                );
            }
            // A single row failure must not abort the rest of the batch.
            Err(e) => log::error!("Failed to update category for {}: {}", ep.id, e),
        }
    }

    log::info!(
        "Backfill complete: {}/{} episodes updated",
        updated,
        pending.len()
    );

    Ok(BackfillReport {
        attempted: pending.len(),
        updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categorizer::NoopCategorizer;
    use crate::database::CategoryLabels;
    use crate::spotify::{EpisodeDetail, PlaylistInfo, PlaylistItem};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path, CategoryLabels::default()).unwrap();
        (db, temp_dir)
    }

    /// In-memory playlist with the given episode ids.
    struct StubSource {
        name: String,
        episode_ids: Vec<String>,
    }

    impl StubSource {
        fn new(name: &str, ids: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                episode_ids: ids.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl PlaylistSource for StubSource {
        async fn playlist(&self, _playlist_id: &str) -> Result<PlaylistInfo, String> {
            Ok(PlaylistInfo {
                name: self.name.clone(),
            })
        }

        async fn playlist_items(&self, _playlist_id: &str) -> Result<Vec<PlaylistItem>, String> {
            Ok(self
                .episode_ids
                .iter()
                .map(|id| {
                    serde_json::from_value(serde_json::json!({
                        "added_at": "2024-01-01T00:00:00Z",
                        "track": {"id": id, "type": "episode"}
                    }))
                    .unwrap()
                })
                .collect())
        }

        async fn episode(&self, episode_id: &str) -> Result<EpisodeDetail, String> {
            Ok(serde_json::from_value(serde_json::json!({
                "name": format!("Episode {}", episode_id),
                "description": "A test episode",
                "duration_ms": 90_000,
                "external_urls": {"spotify": format!("https://open.spotify.com/episode/{}", episode_id)},
                "show": {"name": "Test Show"}
            }))
            .unwrap())
        }
    }

    /// Categorizer stub answering from a fixed id -> status table.
    struct MappingCategorizer {
        mapping: HashMap<String, CategoryStatus>,
    }

    impl MappingCategorizer {
        fn new(entries: &[(&str, &str)]) -> Self {
            Self {
                mapping: entries
                    .iter()
                    .map(|(id, cat)| {
                        (
                            id.to_string(),
                            CategoryStatus::Categorized(cat.to_string()),
                        )
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Categorizer for MappingCategorizer {
        async fn categorize_batch(
            &mut self,
            episodes: &[Episode],
            _existing_categories: &[String],
        ) -> HashMap<String, CategoryStatus> {
            episodes
                .iter()
                .filter_map(|ep| {
                    self.mapping
                        .get(&ep.id)
                        .map(|status| (ep.id.clone(), status.clone()))
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_sync_twice_is_idempotent() {
        let (db, _temp) = setup_test_db();
        let source = StubSource::new("My Podcasts", &["e1", "e2", "e3"]);
        let mut noop = NoopCategorizer;

        let first = sync_playlist(&source, &db, &mut noop, "pl1").await.unwrap();
        assert_eq!(first.processed, 3);
        assert_eq!(first.skipped, 0);

        let second = sync_playlist(&source, &db, &mut noop, "pl1").await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(second.skipped, 3);

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_episodes, 3);
        assert!(db.last_synced_at("pl1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sync_applies_batch_categories() {
        let (db, _temp) = setup_test_db();
        let source = StubSource::new("My Podcasts", &["e1", "e2", "e3"]);
        let mut categorizer = MappingCategorizer::new(&[("e1", "History"), ("e3", "Science")]);

        let report = sync_playlist(&source, &db, &mut categorizer, "pl1")
            .await
            .unwrap();
        assert_eq!(report.processed, 3);

        assert_eq!(
            db.distinct_categories().unwrap(),
            vec!["History".to_string(), "Science".to_string()]
        );
        // e2 was absent from the mapping and stays pending
        let pending = db.uncategorized_episodes().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "e2");
    }

    #[tokio::test]
    async fn test_same_episode_in_two_playlists_is_stored_twice() {
        let (db, _temp) = setup_test_db();
        let source = StubSource::new("List", &["shared"]);
        let mut noop = NoopCategorizer;

        sync_playlist(&source, &db, &mut noop, "pl1").await.unwrap();
        let report = sync_playlist(&source, &db, &mut noop, "pl2").await.unwrap();

        // Uniqueness is on (episode_id, playlist_id), not episode_id alone.
        assert_eq!(report.processed, 1);
        assert_eq!(db.stats().unwrap().total_episodes, 2);
    }

    #[tokio::test]
    async fn test_backfill_converges_when_all_classified() {
        let (db, _temp) = setup_test_db();
        let ids: Vec<String> = (0..10).map(|i| format!("e{}", i)).collect();
        let source = StubSource::new("List", &ids.iter().map(String::as_str).collect::<Vec<_>>());
        let mut noop = NoopCategorizer;
        sync_playlist(&source, &db, &mut noop, "pl1").await.unwrap();
        assert_eq!(db.uncategorized_episodes().unwrap().len(), 10);

        let entries: Vec<(String, String)> = ids
            .iter()
            .map(|id| (id.clone(), format!("Category {}", id)))
            .collect();
        let borrowed: Vec<(&str, &str)> = entries
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        let mut categorizer = MappingCategorizer::new(&borrowed);

        let report = backfill_pending(&db, &mut categorizer).await.unwrap();
        assert_eq!(report.attempted, 10);
        assert_eq!(report.updated, 10);
        assert!(db.uncategorized_episodes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_leaves_unclassified_episodes_for_retry() {
        let (db, _temp) = setup_test_db();
        let ids: Vec<String> = (0..10).map(|i| format!("e{}", i)).collect();
        let source = StubSource::new("List", &ids.iter().map(String::as_str).collect::<Vec<_>>());
        let mut noop = NoopCategorizer;
        sync_playlist(&source, &db, &mut noop, "pl1").await.unwrap();

        // Only six of ten come back classified.
        let mut categorizer = MappingCategorizer::new(&[
            ("e0", "A"),
            ("e1", "B"),
            ("e2", "C"),
            ("e3", "D"),
            ("e4", "E"),
            ("e5", "F"),
        ]);
        let report = backfill_pending(&db, &mut categorizer).await.unwrap();
        assert_eq!(report.updated, 6);
        assert_eq!(db.uncategorized_episodes().unwrap().len(), 4);

        // The remaining four are retried by a later pass.
        let mut second = MappingCategorizer::new(&[
            ("e6", "G"),
            ("e7", "H"),
            ("e8", "I"),
            ("e9", "J"),
        ]);
        let report = backfill_pending(&db, &mut second).await.unwrap();
        assert_eq!(report.attempted, 4);
        assert_eq!(report.updated, 4);
        assert!(db.uncategorized_episodes().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_with_disabled_categorizer_is_a_noop() {
        let (db, _temp) = setup_test_db();
        let source = StubSource::new("List", &["e1"]);
        let mut noop = NoopCategorizer;
        sync_playlist(&source, &db, &mut noop, "pl1").await.unwrap();

        let report = backfill_pending(&db, &mut noop).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(db.uncategorized_episodes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_backfill_on_empty_store_is_a_noop() {
        let (db, _temp) = setup_test_db();
        let mut categorizer = MappingCategorizer::new(&[]);
        let report = backfill_pending(&db, &mut categorizer).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.updated, 0);
    }
}
