use std::collections::BTreeSet;
use std::path::Path;

use crate::archive::Record;

/// Extensions that count as "already downloaded" for a canonical name.
const EXISTING_EXTENSIONS: [&str; 2] = ["jpg", "mp4"];

/// Records split by whether their output already exists on disk.
#[derive(Debug, Default)]
pub struct Partition {
    pub skip: Vec<Record>,
    pub pending: Vec<Record>,
}

/// Partition records into already-present and to-fetch.
///
/// A record is present when `<canonical_name>.jpg` or `<canonical_name>.mp4`
/// exists in `output_dir`. With `skip_existing` off everything is pending.
/// Input order is preserved in both halves.
pub fn partition_existing(records: Vec<Record>, output_dir: &Path, skip_existing: bool) -> Partition {
    if !skip_existing {
        return Partition {
            skip: Vec::new(),
            pending: records,
        };
    }

    let (skip, pending) = records
        .into_iter()
        .partition(|record| already_present(record, output_dir));
    Partition { skip, pending }
}

fn already_present(record: &Record, output_dir: &Path) -> bool {
    let stem = record.canonical_name();
    EXISTING_EXTENSIONS
        .iter()
        .any(|ext| output_dir.join(format!("{}.{}", stem, ext)).exists())
}

/// Keep records captured in one of `years`. `None` or an empty set keeps all.
pub fn filter_years(records: Vec<Record>, years: Option<&BTreeSet<i32>>) -> Vec<Record> {
    match years {
        Some(years) if !years.is_empty() => records
            .into_iter()
            .filter(|r| years.contains(&r.year()))
            .collect(),
        _ => records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::fs;

    fn record(y: i32, sec: u32) -> Record {
        Record::new(
            Utc.with_ymd_and_hms(y, 3, 1, 12, 0, sec).unwrap(),
            format!("https://example.com/{y}/{sec}"),
            "",
        )
    }

    fn names(records: &[Record]) -> Vec<String> {
        records.iter().map(Record::canonical_name).collect()
    }

    #[test]
    fn test_nothing_on_disk_everything_pending() {
        let dir = tempfile::tempdir().unwrap();
        let p = partition_existing(vec![record(2020, 1), record(2020, 2)], dir.path(), true);
        assert!(p.skip.is_empty());
        assert_eq!(p.pending.len(), 2);
    }

    #[test]
    fn test_existing_jpg_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2020-03-01_12-00-02.jpg"), b"x").unwrap();
        let p = partition_existing(
            vec![record(2020, 1), record(2020, 2), record(2020, 3)],
            dir.path(),
            true,
        );
        assert_eq!(names(&p.skip), vec!["2020-03-01_12-00-02"]);
        assert_eq!(
            names(&p.pending),
            vec!["2020-03-01_12-00-01", "2020-03-01_12-00-03"]
        );
    }

    #[test]
    fn test_existing_mp4_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2020-03-01_12-00-01.mp4"), b"x").unwrap();
        let p = partition_existing(vec![record(2020, 1)], dir.path(), true);
        assert_eq!(p.skip.len(), 1);
        assert!(p.pending.is_empty());
    }

    #[test]
    fn test_other_extensions_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2020-03-01_12-00-01.png"), b"x").unwrap();
        fs::write(dir.path().join("2020-03-01_12-00-01.jpg.part"), b"x").unwrap();
        let p = partition_existing(vec![record(2020, 1)], dir.path(), true);
        assert!(p.skip.is_empty());
        assert_eq!(p.pending.len(), 1);
    }

    #[test]
    fn test_skip_disabled_keeps_everything_pending() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2020-03-01_12-00-01.jpg"), b"x").unwrap();
        let p = partition_existing(vec![record(2020, 1)], dir.path(), false);
        assert!(p.skip.is_empty());
        assert_eq!(p.pending.len(), 1);
    }

    #[test]
    fn test_partition_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2020-03-01_12-00-02.jpg"), b"x").unwrap();
        let input = vec![record(2020, 1), record(2020, 2), record(2020, 3)];

        let first = partition_existing(input.clone(), dir.path(), true);
        let second = partition_existing(input, dir.path(), true);
        assert_eq!(first.skip, second.skip);
        assert_eq!(first.pending, second.pending);
    }

    #[test]
    fn test_filter_years() {
        let records = vec![record(2018, 1), record(2019, 1), record(2020, 1)];
        let years: BTreeSet<i32> = [2018, 2020].into_iter().collect();
        let kept = filter_years(records.clone(), Some(&years));
        assert_eq!(kept.iter().map(Record::year).collect::<Vec<_>>(), vec![2018, 2020]);

        assert_eq!(filter_years(records.clone(), None).len(), 3);
        assert_eq!(filter_years(records, Some(&BTreeSet::new())).len(), 3);
    }
}
