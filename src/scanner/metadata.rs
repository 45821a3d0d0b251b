use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Filesystem facts gathered for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFacts {
    /// Capture time in epoch millis, from EXIF or else the file mtime.
    pub taken_ts: i64,
    pub modified_ts: i64,
    pub size_bytes: u64,
    /// Whether `taken_ts` came from EXIF.
    pub from_exif: bool,
}

/// Parse an EXIF date such as `2024:05:01 14:03:22`. The value carries no
/// zone, so it is read as local time. Returns epoch millis.
pub fn parse_exif_datetime(raw: &str) -> Option<i64> {
    let raw = raw.trim().trim_matches('"').trim();
    let naive = NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()?;

    let ts = match Local.from_local_datetime(&naive).earliest() {
        Some(local) => local.timestamp_millis(),
        None => naive.and_utc().timestamp_millis(),
    };
    Some(ts)
}

/// EXIF capture time (`DateTimeOriginal`, then `DateTime`), if present.
pub fn exif_taken_ts(path: &Path) -> Option<i64> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;

    [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, exif::In::PRIMARY))
        .find_map(|field| parse_exif_datetime(&field.display_value().to_string()))
}

/// Capture time in epoch millis, falling back to the file mtime.
pub fn extract_taken_ts(path: &Path) -> Result<i64> {
    Ok(file_facts(path)?.taken_ts)
}

pub fn file_facts(path: &Path) -> Result<FileFacts> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;

    let modified_ts = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();

    let exif_ts = exif_taken_ts(path);

    Ok(FileFacts {
        taken_ts: exif_ts.unwrap_or(modified_ts),
        modified_ts,
        size_bytes: meta.len(),
        from_exif: exif_ts.is_some(),
    })
}
