//! Snapshot keys.
//!
//! A snapshot's file name encodes everything needed to order it:
//! `data.<ts>.<fmt>` for single-shot fetches and `data--<page>.<ts>.<fmt>`
//! for paginated ones, where `<ts>` is a fixed-width UTC timestamp with
//! microsecond precision.

use crate::descriptor::Format;
use std::fmt;
use std::path::{Path, PathBuf};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Directory under a dataset namespace holding its snapshots.
pub(crate) const DATA_DIR: &str = "data";
const STEM: &str = "data";
const PAGE_SEPARATOR: &str = "--";
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]");

/// Parsed snapshot file name.
///
/// Ordering is by timestamp first, then page. Pages of a single pass are
/// written in page order, so this is chronological for both fetch shapes
/// where plain string order would put `data--10` before `data--2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotKey {
    pub timestamp: PrimitiveDateTime,
    pub page: Option<u64>,
    pub format: Format,
}

impl SnapshotKey {
    pub fn new(timestamp: OffsetDateTime, page: Option<u64>, format: Format) -> Self {
        let utc = timestamp.to_offset(UtcOffset::UTC);
        // Keys only carry microseconds.
        let utc = utc.replace_nanosecond(utc.nanosecond() / 1_000 * 1_000).unwrap_or(utc);
        Self {
            timestamp: PrimitiveDateTime::new(utc.date(), utc.time()),
            page,
            format,
        }
    }

    /// The same key, one microsecond later.
    pub fn bumped(self) -> Self {
        Self {
            timestamp: self.timestamp.saturating_add(Duration::microseconds(1)),
            ..self
        }
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp.assume_utc()
    }

    /// Parse a snapshot file name, or `None` if the name is not a snapshot.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (rest, ext) = file_name.rsplit_once('.')?;
        let format = Format::from_extension(ext)?;
        let rest = rest.strip_prefix(STEM)?;
        let (page, timestamp) = match rest.strip_prefix(PAGE_SEPARATOR) {
            Some(paged) => {
                let (page, timestamp) = paged.split_once('.')?;
                if page.is_empty() || !page.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                (Some(page.parse().ok()?), timestamp)
            },
            None => (None, rest.strip_prefix('.')?),
        };
        let timestamp = PrimitiveDateTime::parse(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self { timestamp, page, format })
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }

    /// Full storage key below the dataset namespace.
    pub fn path(&self, dataset: &str) -> PathBuf {
        Path::new(dataset).join(DATA_DIR).join(self.file_name())
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self.timestamp.format(TIMESTAMP_FORMAT).map_err(|_| fmt::Error)?;
        match self.page {
            Some(page) => write!(f, "{STEM}{PAGE_SEPARATOR}{page}.{timestamp}.{}", self.format),
            None => write!(f, "{STEM}.{timestamp}.{}", self.format),
        }
    }
}

/// A snapshot found in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub key: SnapshotKey,
    /// Storage key, usable with the backend directly.
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::macros::datetime;

    #[test]
    fn test_file_name() {
        let at = datetime!(2024-01-02 03:04:05.678901234 UTC);
        assert_eq!(SnapshotKey::new(at, None, Format::Csv).file_name(), "data.2024-01-02T03:04:05.678901.csv");
        assert_eq!(
            SnapshotKey::new(at, Some(12), Format::Json).file_name(),
            "data--12.2024-01-02T03:04:05.678901.json"
        );
        assert_eq!(
            SnapshotKey::new(at, None, Format::Csv).path("ds"),
            Path::new("ds/data/data.2024-01-02T03:04:05.678901.csv")
        );
    }

    #[test]
    fn test_non_utc_offset_is_normalised() {
        let at = datetime!(2024-01-02 05:04:05 +02:00);
        assert_eq!(SnapshotKey::new(at, None, Format::Csv).file_name(), "data.2024-01-02T03:04:05.000000.csv");
    }

    #[rstest]
    #[case("data.2024-01-02T03:04:05.678901.csv", None, Format::Csv)]
    #[case("data--0.2024-01-02T03:04:05.678901.json", Some(0), Format::Json)]
    #[case("data--123.2024-01-02T03:04:05.678901.csv", Some(123), Format::Csv)]
    fn test_parse(#[case] name: &str, #[case] page: Option<u64>, #[case] format: Format) {
        let key = SnapshotKey::parse(name).unwrap();
        assert_eq!(key.page, page);
        assert_eq!(key.format, format);
        assert_eq!(key.timestamp(), datetime!(2024-01-02 03:04:05.678901 UTC));
        assert_eq!(key.file_name(), name);
    }

    #[rstest]
    #[case("notes.txt")]
    #[case("data.csv")]
    #[case("data.2024-01-02T03:04:05.678901.parquet")]
    #[case("data--.2024-01-02T03:04:05.678901.csv")]
    #[case("data--x.2024-01-02T03:04:05.678901.csv")]
    #[case("other.2024-01-02T03:04:05.678901.csv")]
    #[case("data.2024-01-02.csv")]
    fn test_parse_rejects(#[case] name: &str) {
        assert_eq!(SnapshotKey::parse(name), None);
    }

    #[test]
    fn test_ordering_is_chronological_then_by_page() {
        let at = datetime!(2024-01-01 00:00:00 UTC);
        let mut keys = vec![
            SnapshotKey::new(at, Some(10), Format::Json),
            SnapshotKey::new(at + Duration::seconds(1), Some(0), Format::Json),
            SnapshotKey::new(at, Some(2), Format::Json),
        ];
        keys.sort();
        let pages: Vec<_> = keys.iter().map(|k| k.page).collect();
        assert_eq!(pages, [Some(2), Some(10), Some(0)]);
    }

    #[test]
    fn test_bumped() {
        let key = SnapshotKey::new(datetime!(2024-01-01 00:00:00.999999 UTC), None, Format::Csv);
        assert_eq!(key.bumped().file_name(), "data.2024-01-01T00:00:01.000000.csv");
        assert!(key.bumped() > key);
    }
}
