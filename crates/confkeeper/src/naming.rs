//! File naming conventions for the history layout.
//!
//! Everything here is pure string surgery so it can be tested without touching
//! the filesystem:
//!
//! - history aliases insert `.{alias}` before the final extension
//!   (`standalone.xml` → `standalone.last.xml`)
//! - versioned files do the same with `v{N}` (`standalone.v3.xml`)
//! - snapshots prefix the main file name with a fixed-width timestamp
//!   (`20240101-120000000standalone.xml`)

use chrono::{DateTime, TimeZone};

/// Alias for the most recently committed configuration.
pub const LAST: &str = "last";
/// Alias for the configuration seen on the very first boot.
pub const INITIAL: &str = "initial";
/// Alias for the configuration the current process booted from.
pub const BOOT: &str = "boot";
/// Special snapshot prefix meaning "every snapshot".
pub const ALL: &str = "all";

/// Name of the directory holding the versioned files of the running process.
pub const CURRENT_HISTORY_DIR: &str = "current";
/// Name of the directory holding on-demand snapshots.
pub const SNAPSHOT_DIR: &str = "snapshot";

/// `yyyyMMdd-HHmmssSSS`
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S%3f";
/// Width of a formatted timestamp.
pub const TIMESTAMP_LEN: usize = 18;

const XML_EXTENSION: &str = ".xml";

/// Format an instant as a fixed-width history timestamp.
pub fn timestamp<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Whether `name` is exactly a history timestamp (`\d{8}-\d{9}`).
pub fn is_timestamp(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() == TIMESTAMP_LEN
        && bytes.iter().enumerate().all(|(i, b)| {
            if i == 8 {
                *b == b'-'
            } else {
                b.is_ascii_digit()
            }
        })
}

/// Whether `name` is a version alias such as `v12`.
pub fn is_version_alias(name: &str) -> bool {
    name.strip_prefix('v')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Whether `name` is one of the history aliases `last`, `initial`, `boot`.
pub fn is_history_alias(name: &str) -> bool {
    matches!(name, LAST | INITIAL | BOOT)
}

/// Whether `name` looks like a snapshot file: a timestamp followed by a
/// whitespace-free name ending in `.xml`.
pub fn is_snapshot_name(name: &str) -> bool {
    if name.len() < TIMESTAMP_LEN || !name.is_char_boundary(TIMESTAMP_LEN) {
        return false;
    }
    let (stamp, rest) = name.split_at(TIMESTAMP_LEN);
    is_timestamp(stamp) && rest.ends_with(XML_EXTENSION) && !rest.contains(char::is_whitespace)
}

/// Directory name holding the history of `raw_name`.
pub fn history_dir_name(raw_name: &str) -> String {
    format!("{}_history", raw_name.replace('.', "_"))
}

/// The trailing suffix identifying a history alias file, e.g. `.last.xml`.
pub fn alias_suffix(alias: &str) -> String {
    format!(".{alias}{XML_EXTENSION}")
}

/// Insert `.{suffix}` before the final extension of `file_name`.
///
/// A name without an extension gets the suffix appended.
pub fn insert_suffix(file_name: &str, suffix: &str) -> String {
    match file_name.rfind('.') {
        Some(index) => format!(
            "{}.{}{}",
            &file_name[..index],
            suffix,
            &file_name[index..]
        ),
        None => format!("{file_name}.{suffix}"),
    }
}

/// Versioned file name for sequence number `n`.
pub fn versioned_name(file_name: &str, n: u64) -> String {
    insert_suffix(file_name, &format!("v{n}"))
}

/// Recover the main file name from a history file carrying `suffix`.
///
/// Returns `None` if `name` does not carry the suffix or consists of nothing
/// but the suffix.
pub fn strip_alias_suffix(name: &str, suffix: &str) -> Option<String> {
    let base = name.strip_suffix(suffix)?;
    if base.is_empty() {
        return None;
    }
    Some(format!("{base}{XML_EXTENSION}"))
}

/// Recover the main file name from a versioned file (`name.v3.xml` → `name.xml`).
pub fn strip_version_suffix(name: &str) -> Option<String> {
    let without_ext = name.strip_suffix(XML_EXTENSION)?;
    let index = without_ext.rfind(".v")?;
    let (base, version) = without_ext.split_at(index);
    if base.is_empty() || base.contains(char::is_whitespace) || !is_version_alias(&version[1..])
    {
        return None;
    }
    Some(format!("{base}{XML_EXTENSION}"))
}

/// Recover the main file name from a snapshot file name.
pub fn strip_snapshot_prefix(name: &str) -> Option<&str> {
    is_snapshot_name(name).then(|| &name[TIMESTAMP_LEN..])
}

/// Strip whichever history decoration `name` carries: a snapshot timestamp
/// prefix, a `.vN.xml` suffix, or an alias suffix. At most one decoration is
/// removed; undecorated names are returned unchanged.
pub fn strip_prefix_suffix(name: &str) -> String {
    if let Some(base) = strip_snapshot_prefix(name) {
        return base.to_string();
    }
    if let Some(base) = strip_version_suffix(name) {
        return base;
    }
    [LAST, BOOT, INITIAL]
        .iter()
        .find_map(|alias| strip_alias_suffix(name, &alias_suffix(alias)))
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, NaiveDate};

    #[test]
    fn timestamp_is_fixed_width() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(12, 0, 0, 7)
            .unwrap()
            .and_local_timezone(Local)
            .unwrap();
        let stamp = timestamp(&at);
        assert_eq!(stamp, "20240101-120000007");
        assert_eq!(stamp.len(), TIMESTAMP_LEN);
        assert!(is_timestamp(&stamp));
    }

    #[test]
    fn is_timestamp_rejects_near_misses() {
        assert!(!is_timestamp("20240101120000000"));
        assert!(!is_timestamp("2024010-1120000000"));
        assert!(!is_timestamp("20240101-12000000x"));
        assert!(!is_timestamp("current"));
    }

    #[test]
    fn version_alias() {
        assert!(is_version_alias("v1"));
        assert!(is_version_alias("v100"));
        assert!(!is_version_alias("v"));
        assert!(!is_version_alias("v1a"));
        assert!(!is_version_alias("version"));
    }

    #[test]
    fn history_dir_replaces_dots() {
        assert_eq!(history_dir_name("standalone.xml"), "standalone_xml_history");
        assert_eq!(history_dir_name("host.full.xml"), "host_full_xml_history");
    }

    #[test]
    fn insert_suffix_before_extension() {
        assert_eq!(insert_suffix("standalone.xml", LAST), "standalone.last.xml");
        assert_eq!(insert_suffix("a.b.xml", "v3"), "a.b.v3.xml");
        assert_eq!(insert_suffix("noext", BOOT), "noext.boot");
        assert_eq!(versioned_name("standalone.xml", 12), "standalone.v12.xml");
    }

    #[test]
    fn strip_alias_suffix_recovers_base() {
        let suffix = alias_suffix(LAST);
        assert_eq!(
            strip_alias_suffix("standalone.last.xml", &suffix).as_deref(),
            Some("standalone.xml")
        );
        assert_eq!(strip_alias_suffix("standalone.xml", &suffix), None);
    }

    #[test]
    fn bare_suffix_has_no_base() {
        assert_eq!(strip_alias_suffix(".last.xml", &alias_suffix(LAST)), None);
    }

    #[test]
    fn strip_version_suffix_only_for_versions() {
        assert_eq!(
            strip_version_suffix("standalone.v42.xml").as_deref(),
            Some("standalone.xml")
        );
        assert_eq!(strip_version_suffix("standalone.xml"), None);
        assert_eq!(strip_version_suffix("standalone.vx.xml"), None);
        assert_eq!(strip_version_suffix(".v1.xml"), None);
    }

    #[test]
    fn snapshot_names() {
        assert!(is_snapshot_name("20240101-120000000standalone.xml"));
        assert!(!is_snapshot_name("20240101-120000000standalone.txt"));
        assert!(!is_snapshot_name("20240101-120000000stand alone.xml"));
        assert!(!is_snapshot_name("standalone.xml"));
        assert_eq!(
            strip_snapshot_prefix("20240101-120000000standalone.xml"),
            Some("standalone.xml")
        );
    }

    #[test]
    fn strip_prefix_suffix_removes_one_decoration() {
        assert_eq!(strip_prefix_suffix("standalone.xml"), "standalone.xml");
        assert_eq!(strip_prefix_suffix("standalone.boot.xml"), "standalone.xml");
        assert_eq!(strip_prefix_suffix("standalone.initial.xml"), "standalone.xml");
        assert_eq!(strip_prefix_suffix("standalone.v7.xml"), "standalone.xml");
        assert_eq!(
            strip_prefix_suffix("20240101-120000000standalone.last.xml"),
            "standalone.last.xml"
        );
        // no double stripping
        assert_eq!(strip_prefix_suffix("a.boot.last.xml"), "a.boot.xml");
    }
}
