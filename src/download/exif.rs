//! Best-effort metadata annotation for downloaded images.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

/// Post-processing hook run on each successfully downloaded image.
///
/// Implementations must absorb their own failures: a download that reached
/// disk is a success regardless of what happens here.
pub trait Annotate: Send + Sync {
    fn annotate(
        &self,
        path: &Path,
        taken_at: DateTime<Utc>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    );
}

/// Hook used when metadata writing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAnnotator;

impl Annotate for NoopAnnotator {
    fn annotate(&self, _: &Path, _: DateTime<Utc>, _: Option<f64>, _: Option<f64>) {}
}

/// Writes capture date and GPS position into the file's EXIF block.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifAnnotator;

impl Annotate for ExifAnnotator {
    fn annotate(
        &self,
        path: &Path,
        taken_at: DateTime<Utc>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) {
        let coords = latitude.zip(longitude);
        if let Err(e) = set_photo_exif(path, &taken_at, coords) {
            tracing::debug!("Skipping EXIF for {}: {:#}", path.display(), e);
        }
    }
}

/// Degrees, whole minutes, fractional seconds of an absolute decimal angle.
pub fn decimal_to_dms(decimal: f64) -> (u32, u32, f64) {
    let abs = decimal.abs();
    let degrees = abs.trunc();
    let minutes_decimal = (abs - degrees) * 60.0;
    let minutes = minutes_decimal.trunc();
    let seconds = (minutes_decimal - minutes) * 60.0;
    (degrees as u32, minutes as u32, seconds)
}

pub fn latitude_ref(latitude: f64) -> &'static str {
    if latitude >= 0.0 {
        "N"
    } else {
        "S"
    }
}

pub fn longitude_ref(longitude: f64) -> &'static str {
    if longitude >= 0.0 {
        "E"
    } else {
        "W"
    }
}

fn dms_rationals(decimal: f64) -> Vec<little_exif::rational::uR64> {
    use little_exif::rational::uR64;

    let (d, m, s) = decimal_to_dms(decimal);
    vec![
        uR64 {
            nominator: d,
            denominator: 1,
        },
        uR64 {
            nominator: m,
            denominator: 1,
        },
        uR64 {
            nominator: (s * 1000.0).round() as u32,
            denominator: 1000,
        },
    ]
}

/// Write `DateTimeOriginal`, `CreateDate`, `ModifyDate` and, when given,
/// the GPS position tags.
fn set_photo_exif(path: &Path, taken_at: &DateTime<Utc>, coords: Option<(f64, f64)>) -> Result<()> {
    use little_exif::exif_tag::ExifTag;
    use little_exif::metadata::Metadata;

    let mut metadata = Metadata::new_from_path(path)
        .with_context(|| format!("Reading EXIF metadata from {}", path.display()))?;

    let stamp = taken_at.format("%Y:%m:%d %H:%M:%S").to_string();
    metadata.set_tag(ExifTag::DateTimeOriginal(stamp.clone()));
    metadata.set_tag(ExifTag::CreateDate(stamp.clone()));
    metadata.set_tag(ExifTag::ModifyDate(stamp));

    if let Some((lat, lon)) = coords {
        metadata.set_tag(ExifTag::GPSLatitudeRef(latitude_ref(lat).to_string()));
        metadata.set_tag(ExifTag::GPSLatitude(dms_rationals(lat)));
        metadata.set_tag(ExifTag::GPSLongitudeRef(longitude_ref(lon).to_string()));
        metadata.set_tag(ExifTag::GPSLongitude(dms_rationals(lon)));
    }

    metadata
        .write_to_file(path)
        .with_context(|| format!("Writing EXIF metadata to {}", path.display()))?;

    tracing::debug!("Set EXIF date {} on {}", taken_at, path.display());
    Ok(())
}
