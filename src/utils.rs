//! Shared utility helpers.

use std::path::{Path, PathBuf};

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}

/// Truncate a string to `max` chars, appending `…` if trimmed.
pub fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("Ayşe", 3), "Ay…");
        assert_eq!(truncate_str("short", 10), "short");
    }

    #[test]
    fn relative_paths_resolve_against_base() {
        let base = Path::new("/srv/specter");
        assert_eq!(
            resolve_against(base, "data"),
            PathBuf::from("/srv/specter/data")
        );
        assert_eq!(resolve_against(base, "/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
