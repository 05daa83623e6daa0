use serde::{Deserialize, Deserializer, Serialize};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Metadata for one locally stocked track.
///
/// Field names follow the downloader's `.info.json` documents so the same
/// shape can be read from either an info file or the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
    /// Length in seconds; `null` (live streams) reads as 0.
    #[serde(default, deserialize_with = "seconds_or_zero")]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
}

impl TrackInfo {
    pub fn new(id: impl Into<String>, title: impl Into<String>, duration: f64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            duration: duration.max(0.0),
            ..Self::default()
        }
    }

    /// Uploader, then creator, then a fixed placeholder.
    pub fn artist(&self) -> &str {
        [self.uploader.as_deref(), self.creator.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .unwrap_or(UNKNOWN_ARTIST)
    }
}

fn seconds_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let seconds = Option::<f64>::deserialize(deserializer)?;
    Ok(seconds.unwrap_or(0.0).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::{TrackInfo, UNKNOWN_ARTIST};

    #[test]
    fn artist_fallback_chain() {
        let mut track = TrackInfo::new("abc", "Song", 10.0);
        assert_eq!(track.artist(), UNKNOWN_ARTIST);

        track.creator = Some("Creator".to_string());
        assert_eq!(track.artist(), "Creator");

        track.uploader = Some("".to_string());
        assert_eq!(track.artist(), "Creator");

        track.uploader = Some("Channel".to_string());
        assert_eq!(track.artist(), "Channel");
    }

    #[test]
    fn null_or_negative_duration_reads_as_zero() {
        let live: TrackInfo =
            serde_json::from_str(r#"{"id":"live1","title":"Live","duration":null}"#).unwrap();
        assert_eq!(live.duration, 0.0);

        let odd: TrackInfo =
            serde_json::from_str(r#"{"id":"x","title":"X","duration":-3.5}"#).unwrap();
        assert_eq!(odd.duration, 0.0);

        let missing: TrackInfo = serde_json::from_str(r#"{"id":"y","title":"Y"}"#).unwrap();
        assert_eq!(missing.duration, 0.0);
    }

    #[test]
    fn reads_downloader_info_document() {
        let raw = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "uploader": "Rick Astley",
            "duration": 212,
            "release_year": 1987,
            "upload_date": "20091025",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "formats": [{"format_id": "251"}]
        }"#;

        let track: TrackInfo = serde_json::from_str(raw).expect("parse info json");
        assert_eq!(track.id, "dQw4w9WgXcQ");
        assert_eq!(track.duration, 212.0);
        assert_eq!(track.release_year, Some(1987));
        assert_eq!(track.creator, None);
        assert_eq!(track.artist(), "Rick Astley");
    }

    #[test]
    fn negative_duration_is_clamped() {
        assert_eq!(TrackInfo::new("x", "y", -3.0).duration, 0.0);
    }
}
