//! Generic file names derived from a timestamp and an optional nametag.
//!
//! `20210130-1130-59` for a bare timestamp, `20210130-1130-59_run_1` with
//! the nametag `"run 1"`. Data files, sidecars and thumbnails saved with the
//! same (timestamp, nametag) pair share this base name.

use chrono::NaiveDateTime;

use crate::error::{LabstoreError, Result};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M-%S";

/// Trim the tag and collapse every whitespace run into one underscore.
/// Blank tags and tags containing path separators are rejected.
pub fn normalize_nametag(tag: &str) -> Result<String> {
    let parts: Vec<&str> = tag.split_whitespace().collect();
    if parts.is_empty() || tag.contains(['/', '\\']) {
        return Err(LabstoreError::InvalidTag(tag.to_string()));
    }
    Ok(parts.join("_"))
}

/// Base file name (no extension). `None` means no tag; a tag that is blank
/// after trimming is rejected.
pub fn generic_filename(timestamp: NaiveDateTime, nametag: Option<&str>) -> Result<String> {
    let stamp = timestamp.format(TIMESTAMP_FORMAT).to_string();
    match nametag {
        Some(tag) => Ok(format!("{stamp}_{}", normalize_nametag(tag)?)),
        None => Ok(stamp),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 1, 30)
            .unwrap()
            .and_hms_opt(11, 30, 59)
            .unwrap()
    }

    #[test]
    fn test_timestamp_only() {
        assert_eq!(generic_filename(ts(), None).unwrap(), "20210130-1130-59");
    }

    #[test]
    fn test_with_nametag() {
        assert_eq!(
            generic_filename(ts(), Some("run1")).unwrap(),
            "20210130-1130-59_run1"
        );
    }

    #[test]
    fn test_whitespace_is_collapsed() {
        assert_eq!(
            generic_filename(ts(), Some("  a   b ")).unwrap(),
            generic_filename(ts(), Some("a_b")).unwrap()
        );
        assert_eq!(
            generic_filename(ts(), Some("odmr\tscan\u{00a0}2")).unwrap(),
            "20210130-1130-59_odmr_scan_2"
        );
    }

    #[test]
    fn test_invalid_tag_is_rejected() {
        for tag in ["", "   ", "\t\n", "../escape"] {
            let err = generic_filename(ts(), Some(tag)).unwrap_err();
            assert!(matches!(err, LabstoreError::InvalidTag(_)));
        }
    }

    proptest! {
        #[test]
        fn prop_normalization_is_idempotent(tag in "[a-z ]{0,5}[a-z][a-z \t]{0,10}") {
            let once = normalize_nametag(&tag).unwrap();
            let twice = normalize_nametag(&once).unwrap();
            prop_assert_eq!(&once, &twice);
            prop_assert!(!once.chars().any(char::is_whitespace));
        }

        #[test]
        fn prop_filename_is_deterministic(tag in "[a-zA-Z0-9 ]{1,20}") {
            prop_assume!(!tag.trim().is_empty());
            prop_assert_eq!(
                generic_filename(ts(), Some(&tag)).unwrap(),
                generic_filename(ts(), Some(&tag)).unwrap()
            );
        }
    }
}
