use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;

/// `"lat, lon"` as it appears in the export's free-text location field.
static COORDINATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([-\d.]+),\s*([-\d.]+)").expect("valid coordinate pattern")
});

/// One downloadable item from the archive.
///
/// Built once from the export and read-only afterwards. Coordinates are
/// derived from `location_raw` at construction time when the text carries a
/// numeric `"lat, lon"` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    timestamp: DateTime<Utc>,
    source_link: String,
    location_raw: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl Record {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_link: impl Into<String>,
        location_raw: impl Into<String>,
    ) -> Self {
        let location_raw = location_raw.into();
        let (latitude, longitude) = match parse_coordinates(&location_raw) {
            Some((lat, lon)) => (Some(lat), Some(lon)),
            None => (None, None),
        };
        Self {
            timestamp,
            source_link: source_link.into(),
            location_raw,
            latitude,
            longitude,
        }
    }

    /// Build a record with explicit coordinates. The location text is kept
    /// verbatim and not re-parsed.
    #[cfg(test)]
    pub fn with_coordinates(
        timestamp: DateTime<Utc>,
        source_link: impl Into<String>,
        location_raw: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            timestamp,
            source_link: source_link.into(),
            location_raw: location_raw.into(),
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source_link(&self) -> &str {
        &self.source_link
    }

    pub fn location_raw(&self) -> &str {
        &self.location_raw
    }

    pub fn latitude(&self) -> Option<f64> {
        self.latitude
    }

    pub fn longitude(&self) -> Option<f64> {
        self.longitude
    }

    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    /// Output file stem, `YYYY-MM-DD_HH-MM-SS`. The extension is only known
    /// once the download link has been resolved.
    pub fn canonical_name(&self) -> String {
        self.timestamp.format("%Y-%m-%d_%H-%M-%S").to_string()
    }
}

/// Extract a `(latitude, longitude)` pair from free text.
///
/// Returns `None` unless both captured halves parse as finite floats.
fn parse_coordinates(text: &str) -> Option<(f64, f64)> {
    let caps = COORDINATES.captures(text)?;
    let lat: f64 = caps.get(1)?.as_str().parse().ok()?;
    let lon: f64 = caps.get(2)?.as_str().parse().ok()?;
    if lat.is_finite() && lon.is_finite() {
        Some((lat, lon))
    } else {
        None
    }
}
