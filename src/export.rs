//! CSV export of the stored episode table.

use std::path::{Path, PathBuf};

use crate::database::Database;
use crate::error::AppError;

/// Write the stored rows (optionally one playlist) to a CSV file, newest
/// playlist addition first. Returns `None` when there is nothing to export.
pub fn export_to_csv(
    db: &Database,
    filename: Option<&Path>,
    playlist_id: Option<&str>,
) -> Result<Option<PathBuf>, AppError> {
    let episodes = db.episodes_for_export(playlist_id)?;
    if episodes.is_empty() {
        log::warn!("No data to export");
        return Ok(None);
    }

    let path = match filename {
        Some(path) => path.to_path_buf(),
        None => {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            let suffix = match playlist_id {
                Some(id) => format!("_{}", id),
                None => "_all".to_string(),
            };
            PathBuf::from(format!("podsift{}_{}.csv", suffix, timestamp))
        }
    };

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record([
        "Episode ID",
        "Playlist ID",
        "Title",
        "Description",
        "Duration (min)",
        "Added At",
        "Spotify URL",
        "Category",
        "Podcast",
        "Processed At",
    ])?;

    for ep in &episodes {
        let duration = format!("{:.2}", ep.duration_minutes);
        writer.write_record([
            ep.id.as_str(),
            ep.playlist_id.as_str(),
            ep.title.as_str(),
            ep.description.as_str(),
            duration.as_str(),
            ep.added_at.as_str(),
            ep.url.as_str(),
            ep.category.as_label(db.labels()),
            ep.show_name.as_str(),
            ep.processed_at.as_deref().unwrap_or(""),
        ])?;
    }
    writer.flush()?;

    log::info!(
        "CSV file generated: {} ({} episodes)",
        path.display(),
        episodes.len()
    );

    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{CategoryLabels, CategoryStatus, Episode};
    use tempfile::TempDir;

    fn episode(id: &str, added_at: &str) -> Episode {
        Episode {
            id: id.to_string(),
            playlist_id: "pl1".to_string(),
            title: format!("Episode {}", id),
            description: "desc, with comma".to_string(),
            duration_minutes: 12.5,
            added_at: added_at.to_string(),
            url: format!("https://open.spotify.com/episode/{}", id),
            show_name: "Show".to_string(),
            category: CategoryStatus::Pending,
            processed_at: None,
        }
    }

    #[test]
    fn test_export_empty_store_returns_none() {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("t.db"), CategoryLabels::default()).unwrap();
        let result = export_to_csv(&db, Some(&temp.path().join("out.csv")), None).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_export_writes_header_and_rows_newest_first() {
        let temp = TempDir::new().unwrap();
        let db = Database::new(&temp.path().join("t.db"), CategoryLabels::default()).unwrap();
        db.upsert_episode(&episode("e1", "2024-01-01T00:00:00Z"))
            .unwrap();
        db.upsert_episode(&episode("e2", "2024-06-01T00:00:00Z"))
            .unwrap();

        let out = temp.path().join("out.csv");
        let path = export_to_csv(&db, Some(&out), None).unwrap().unwrap();
        assert_eq!(path, out);

        let content = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Episode ID"));
        // Newest playlist addition first
        assert!(lines[1].contains("e2"));
        assert!(lines[2].contains("e1"));
    }
}
