use serde::{Deserialize, Serialize};

/// A single matched photo as returned by the gallery endpoint.
///
/// Photos are immutable once fetched; the only client-side changes are
/// removal after a successful delete and the local favorite toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryPhoto {
    pub id: String,
    pub filename: String,
    pub original_filename: String,
    pub s3_key: String,
    pub uploaded_at: String,
    pub thumbnail_url: String,
    pub download_url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub is_enhanced: bool,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryFilter {
    All,
    Enhanced,
    Favorites,
}

impl GalleryFilter {
    pub const ALL_FILTERS: [GalleryFilter; 3] = [
        GalleryFilter::All,
        GalleryFilter::Enhanced,
        GalleryFilter::Favorites,
    ];

    /// Value used in the gallery request query string.
    pub fn query_value(self) -> &'static str {
        match self {
            GalleryFilter::All => "all",
            GalleryFilter::Enhanced => "enhanced",
            GalleryFilter::Favorites => "favorites",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GalleryFilter::All => "All photos",
            GalleryFilter::Enhanced => "Enhanced",
            GalleryFilter::Favorites => "Favorites",
        }
    }

    pub fn matches(self, photo: &GalleryPhoto) -> bool {
        match self {
            GalleryFilter::All => true,
            GalleryFilter::Enhanced => photo.is_enhanced,
            GalleryFilter::Favorites => photo.is_favorite,
        }
    }
}

/// Order-preserving subsequence of `photos` passing `filter`.
pub fn filtered(photos: &[GalleryPhoto], filter: GalleryFilter) -> Vec<GalleryPhoto> {
    photos
        .iter()
        .filter(|p| filter.matches(p))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryUser {
    pub name: String,
    #[serde(rename = "totalPhotos")]
    pub total_photos: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryEvent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct GalleryResponse {
    pub photos: Vec<GalleryPhoto>,
    pub user: GalleryUser,
    #[serde(default)]
    pub event: Option<GalleryEvent>,
    #[serde(rename = "retentionDays", default = "default_retention_days")]
    pub retention_days: u32,
}

/// Kind of trackable user action sent to the interaction collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interaction {
    GalleryOpen,
    PhotoView,
    PhotoDownload,
    PhotoShare,
    GallerySearch,
}

impl Interaction {
    /// High-value, low-frequency interactions bypass the queue.
    pub fn is_immediate(self) -> bool {
        matches!(
            self,
            Interaction::GalleryOpen | Interaction::PhotoDownload | Interaction::PhotoShare
        )
    }
}

/// One interaction event, both the wire payload and the queued/durable form.
///
/// `timestamp` and `retries` ride along in the POST body the same way they
/// are persisted, so a replayed event is indistinguishable from a live one
/// apart from its retry counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub code: String,
    pub interaction_type: Interaction,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub photo_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
    pub timestamp: u64,
    #[serde(default)]
    pub retries: u32,
}
