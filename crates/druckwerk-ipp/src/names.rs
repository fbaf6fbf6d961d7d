// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Name and path hygiene for printer resource paths and file: URIs.

use std::path::Path;

/// Sanitize a submitted printer-name for use in a resource path.
///
/// Any code point at or below U+0020, `#`, `/`, or U+007F becomes `_`.
pub fn sanitize_printer_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c <= '\u{20}' || c == '#' || c == '/' || c == '\u{7f}' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Validate a filename from a `file:` document URI.
///
/// Rejected when the path contains `/../` or `/./` segments, or when no
/// allow-listed directory is a prefix of the path with the next character
/// being `/` or end-of-string.
pub fn valid_filename(filename: &str, allowed: &[impl AsRef<Path>]) -> bool {
    if filename.contains("/../") || filename.contains("/./") {
        return false;
    }
    if filename.ends_with("/..") || filename.ends_with("/.") {
        return false;
    }

    allowed.iter().any(|dir| {
        let dir = dir.as_ref().to_string_lossy();
        let dir = dir.strip_suffix('/').unwrap_or(&dir);
        match filename.strip_prefix(dir) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_chars_and_separators_become_underscores() {
        assert_eq!(sanitize_printer_name("Front Desk"), "Front_Desk");
        assert_eq!(sanitize_printer_name("a/b#c"), "a_b_c");
        assert_eq!(sanitize_printer_name("tab\there"), "tab_here");
        assert_eq!(sanitize_printer_name("del\u{7f}ete"), "del_ete");
        assert_eq!(sanitize_printer_name("Küche"), "Küche");
    }

    #[test]
    fn traversal_segments_are_rejected() {
        let allowed = ["/var/spool/docs"];
        assert!(!valid_filename("/var/spool/docs/../secret", &allowed));
        assert!(!valid_filename("/var/spool/docs/./x", &allowed));
        assert!(!valid_filename("/var/spool/docs/..", &allowed));
    }

    #[test]
    fn prefix_match_requires_component_boundary() {
        let allowed = ["/var/spool/docs"];
        assert!(valid_filename("/var/spool/docs/report.pdf", &allowed));
        assert!(valid_filename("/var/spool/docs", &allowed));
        assert!(!valid_filename("/var/spool/docs-evil/report.pdf", &allowed));
        assert!(!valid_filename("/tmp/report.pdf", &allowed));
    }

    #[test]
    fn empty_allow_list_rejects_everything() {
        let allowed: [&str; 0] = [];
        assert!(!valid_filename("/var/spool/docs/report.pdf", &allowed));
    }
}
