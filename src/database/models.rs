use serde::{Deserialize, Serialize};

/// Classification state of an episode.
///
/// The store keeps a single `category` text column; the two non-categorized
/// states are written as sentinel labels and mapped back to this enum on
/// read. `Pending` and `Failed` are both eligible for a later backfill pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Pending,
    Categorized(String),
    Failed,
}

impl Default for CategoryStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl CategoryStatus {
    /// True for states a backfill pass should retry.
    pub fn needs_categorization(&self) -> bool {
        !matches!(self, Self::Categorized(_))
    }

    /// The string written to the `category` column.
    pub fn as_label<'a>(&'a self, labels: &'a CategoryLabels) -> &'a str {
        match self {
            Self::Pending => &labels.pending,
            Self::Categorized(name) => name,
            Self::Failed => &labels.failed,
        }
    }

    /// Map a stored label back to the domain state. An empty column is
    /// treated as pending so legacy rows stay eligible for backfill.
    pub fn from_label(label: &str, labels: &CategoryLabels) -> Self {
        if label.is_empty() || label == labels.pending {
            Self::Pending
        } else if label == labels.failed {
            Self::Failed
        } else {
            Self::Categorized(label.to_string())
        }
    }
}

/// Sentinel labels used at the storage boundary for the two
/// non-categorized states. Configurable so existing databases written
/// with different labels keep working.
#[derive(Debug, Clone)]
pub struct CategoryLabels {
    pub pending: String,
    pub failed: String,
}

impl Default for CategoryLabels {
    fn default() -> Self {
        Self {
            pending: "Uncategorized".to_string(),
            failed: "Categorization failed".to_string(),
        }
    }
}

/// One playlist item, keyed by (episode id, playlist id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub playlist_id: String,
    pub title: String,
    pub description: String,
    pub duration_minutes: f64,
    /// Timestamp string reported by the playlist ("added_at"); kept opaque.
    pub added_at: String,
    pub url: String,
    pub show_name: String,
    pub category: CategoryStatus,
    /// Set by the store on every upsert.
    pub processed_at: Option<String>,
}

/// Aggregate counts for status logging and the post-export summary.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_episodes: i64,
    pub total_categories: i64,
    pub uncategorized: i64,
    pub total_playlists: i64,
    pub top_categories: Vec<(String, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_round_trip() {
        let labels = CategoryLabels::default();

        for status in [
            CategoryStatus::Pending,
            CategoryStatus::Failed,
            CategoryStatus::Categorized("History".to_string()),
        ] {
            let label = status.as_label(&labels).to_string();
            assert_eq!(CategoryStatus::from_label(&label, &labels), status);
        }
    }

    #[test]
    fn test_empty_label_reads_as_pending() {
        let labels = CategoryLabels::default();
        assert_eq!(
            CategoryStatus::from_label("", &labels),
            CategoryStatus::Pending
        );
    }

    #[test]
    fn test_needs_categorization() {
        assert!(CategoryStatus::Pending.needs_categorization());
        assert!(CategoryStatus::Failed.needs_categorization());
        assert!(!CategoryStatus::Categorized("X".to_string()).needs_categorization());
    }
}
