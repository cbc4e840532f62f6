// SPDX-License-Identifier: Apache-2.0

//! Path overlap between archive roots and tailing roots.
//!
//! Comparison is purely lexical so it behaves the same for paths from any
//! platform: separators are unified, `.`/`..` are resolved, case is folded, and
//! roots are compared segment by segment.

/// Split a path into normalized, lower-cased segments
pub fn normalize(path: &str) -> Vec<String> {
    let unified = path.replace('\\', "/").to_lowercase();
    let mut segments: Vec<String> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s.to_string()),
        }
    }
    segments
}

/// Whether `a` is equal to, an ancestor of, or a descendant of `b`
pub fn paths_overlap(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    let shared = a.len().min(b.len());
    a[..shared] == b[..shared]
}

/// Whether `archive_root` overlaps any of `tailing_roots`
pub fn overlap<S: AsRef<str>>(archive_root: &str, tailing_roots: &[S]) -> bool {
    tailing_roots
        .iter()
        .any(|t| paths_overlap(archive_root, t.as_ref()))
}
