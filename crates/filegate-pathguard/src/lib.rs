//! Boundary guard for the filegate gateway.
//!
//! Every downstream handler turns a caller-supplied logical path into a
//! physical one through [`PathPolicy`]. Resolution is fail-closed: anything
//! ambiguous (unreadable segment, symlink chain that leaves the root, `..`
//! escape) yields `None`, never a best-effort path.

#![forbid(unsafe_code)]

mod pattern;

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Maximum number of symlink hops followed while canonicalizing a single
/// path. Mirrors the kernel's ELOOP limit; a longer chain is treated as an
/// escape attempt.
const MAX_LINK_HOPS: u32 = 40;

/// Root-containment and visibility policy for one served subtree.
///
/// The root must already be in canonical (symlink-free) form; the server
/// canonicalizes it once at startup. All containment checks compare against
/// it with plain prefix semantics.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    root: PathBuf,
    hide_patterns: Vec<String>,
    blocked_extensions: HashSet<String>,
}

impl PathPolicy {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hide_patterns: Vec::new(),
            blocked_extensions: HashSet::new(),
        }
    }

    /// Glob-style patterns (`*`, `?`, `**`) matched against root-relative
    /// paths; matching entries are invisible to every surface.
    pub fn with_hide_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hide_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// File extensions (case-insensitive, no leading dot) for which downloads
    /// are refused.
    pub fn with_blocked_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blocked_extensions = extensions
            .into_iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Joins a logical path onto the root. Returns `None` for absolute
    /// inputs, NUL bytes, or any `..` segment; the result is always the root
    /// itself or strictly below it.
    pub fn resolve_physical_path(&self, relative: &str) -> Option<PathBuf> {
        let rel = normalize_relative(relative)?;
        if rel.is_empty() {
            return Some(self.root.clone());
        }
        Some(self.root.join(rel))
    }

    /// Walks `physical` from the root inward, resolving each symlink it
    /// encounters and re-checking containment after every hop. Returns `None`
    /// the instant a resolved target leaves the root, on any I/O error other
    /// than a missing trailing segment, or if `physical` is not under the
    /// root to begin with.
    ///
    /// Resolution is redone on every call; caching it across requests would
    /// reopen the plant-a-symlink-after-validation race.
    pub fn resolve_canonical_path(&self, physical: &Path) -> Option<PathBuf> {
        let rel = physical.strip_prefix(&self.root).ok()?;

        let mut pending: Vec<&std::ffi::OsStr> = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(seg) => pending.push(seg),
                Component::CurDir => {}
                // `..`, a root, or a prefix below the root means the caller
                // bypassed resolve_physical_path.
                _ => return None,
            }
        }

        let mut resolved = self.root.clone();
        let mut hops = 0u32;

        for seg in pending {
            resolved.push(seg);

            loop {
                let meta = match fs::symlink_metadata(&resolved) {
                    Ok(meta) => meta,
                    // A missing segment cannot be a symlink; the remainder of
                    // the walk is purely lexical and stays contained.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => break,
                    Err(_) => return None,
                };
                if !meta.file_type().is_symlink() {
                    break;
                }

                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return None;
                }

                let target = fs::read_link(&resolved).ok()?;
                let base = resolved.parent()?.to_path_buf();
                let joined = if target.is_absolute() {
                    target
                } else {
                    base.join(target)
                };
                let normalized = lexical_normalize(&joined)?;
                if !normalized.starts_with(&self.root) {
                    return None;
                }
                resolved = normalized;
            }
        }

        if resolved.starts_with(&self.root) {
            Some(resolved)
        } else {
            None
        }
    }

    /// Whether a root-relative path is hidden by the configured patterns.
    /// Directories are additionally tested in trailing-slash form so a
    /// pattern like `secret/**` hides the directory itself, not only its
    /// contents.
    pub fn is_hidden(&self, relative: &str, is_directory: bool) -> bool {
        let Some(rel) = normalize_relative(relative) else {
            // Unresolvable paths are never served, so visibility is moot;
            // treat them as hidden for consistency with fail-closed checks.
            return true;
        };
        if rel.is_empty() {
            return false;
        }

        let segments: Vec<&str> = rel.split('/').collect();
        let mut dir_segments = segments.clone();
        if is_directory {
            dir_segments.push("");
        }

        self.hide_patterns.iter().any(|pattern| {
            let pat: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
            if pat.is_empty() {
                return false;
            }
            pattern::glob_match(&pat, &segments)
                || (is_directory && pattern::glob_match(&pat, &dir_segments))
        })
    }

    /// Whether the file's extension is on the download deny-list.
    pub fn is_download_blocked(&self, relative: &str) -> bool {
        if self.blocked_extensions.is_empty() {
            return false;
        }
        let name = relative.rsplit(['/', '\\']).next().unwrap_or(relative);
        match name.rsplit_once('.') {
            Some((_, ext)) if !ext.is_empty() => self
                .blocked_extensions
                .contains(&ext.to_ascii_lowercase()),
            _ => false,
        }
    }
}

/// Normalizes a caller-supplied logical path to slash-separated segments with
/// no `.` or empty segments. Returns `None` for absolute paths, drive
/// prefixes, NUL bytes, or any `..` segment.
///
/// `..` is rejected outright rather than folded away: a logical path that
/// tries to traverse upward is hostile input, even when the folded result
/// would land back inside the root.
pub fn normalize_relative(path: &str) -> Option<String> {
    if path.contains('\0') {
        return None;
    }
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in unified.split('/') {
        match seg {
            "" | "." => {}
            ".." => return None,
            seg => {
                // A drive or scheme prefix in the first segment is an
                // absolute-path escape on the platforms that honor it.
                if segments.is_empty() && seg.contains(':') {
                    return None;
                }
                segments.push(seg);
            }
        }
    }
    Some(segments.join("/"))
}

/// Lexically resolves `.` and `..` in an absolute path without touching the
/// filesystem. Returns `None` if `..` would climb past the filesystem root.
fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::Normal(seg) => out.push(seg),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(root: &Path) -> PathPolicy {
        PathPolicy::new(root)
    }

    #[test]
    fn rejects_parent_traversal_and_absolute_paths() {
        let p = policy(Path::new("/srv/data"));
        for bad in [
            "../etc/passwd",
            "a/../../b",
            "a/..",
            "..",
            "/etc/passwd",
            "\\\\server\\share",
            "c:/windows",
            "a\0b",
        ] {
            assert_eq!(p.resolve_physical_path(bad), None, "expected rejection: {bad}");
        }
    }

    #[test]
    fn resolves_and_normalizes_relative_paths() {
        let p = policy(Path::new("/srv/data"));
        assert_eq!(
            p.resolve_physical_path("docs/a.txt"),
            Some(PathBuf::from("/srv/data/docs/a.txt"))
        );
        assert_eq!(
            p.resolve_physical_path("./docs//a.txt"),
            Some(PathBuf::from("/srv/data/docs/a.txt"))
        );
        assert_eq!(
            p.resolve_physical_path("docs\\sub\\b.txt"),
            Some(PathBuf::from("/srv/data/docs/sub/b.txt"))
        );
        assert_eq!(p.resolve_physical_path(""), Some(PathBuf::from("/srv/data")));
    }

    #[test]
    fn hide_patterns_match_segment_wise() {
        let p = policy(Path::new("/srv/data"))
            .with_hide_patterns(["secret/**", "*.bak", "**/.git/**", "priv?te"]);

        assert!(p.is_hidden("secret/a/b.txt", false));
        assert!(p.is_hidden("secret", true));
        assert!(!p.is_hidden("secrets/a.txt", false));
        assert!(!p.is_hidden("secret", false));

        assert!(p.is_hidden("notes.bak", false));
        assert!(!p.is_hidden("notes.bak.txt", false));

        assert!(p.is_hidden("x/y/.git/config", false));
        assert!(p.is_hidden("private", false));
        assert!(p.is_hidden("privote", false));
        assert!(!p.is_hidden("privaate", false));
    }

    #[test]
    fn hidden_check_fails_closed_on_bad_input() {
        let p = policy(Path::new("/srv/data")).with_hide_patterns(["secret/**"]);
        assert!(p.is_hidden("../secret", false));
    }

    #[test]
    fn download_deny_list_is_case_insensitive() {
        let p = policy(Path::new("/srv/data")).with_blocked_extensions(["exe", ".DLL"]);
        assert!(p.is_download_blocked("tools/setup.EXE"));
        assert!(p.is_download_blocked("lib.dll"));
        assert!(!p.is_download_blocked("readme.txt"));
        assert!(!p.is_download_blocked("no_extension"));
        assert!(!p.is_download_blocked("trailingdot."));
    }

    #[cfg(unix)]
    mod symlinks {
        use super::*;
        use std::os::unix::fs::symlink;

        fn canonical_tempdir() -> (tempfile::TempDir, PathBuf) {
            let tmp = tempfile::tempdir().unwrap();
            let root = tmp.path().canonicalize().unwrap();
            (tmp, root)
        }

        #[test]
        fn plain_files_resolve_to_themselves() {
            let (_tmp, root) = canonical_tempdir();
            std::fs::create_dir(root.join("docs")).unwrap();
            std::fs::write(root.join("docs/a.txt"), b"hi").unwrap();

            let p = policy(&root);
            let physical = p.resolve_physical_path("docs/a.txt").unwrap();
            assert_eq!(p.resolve_canonical_path(&physical), Some(physical.clone()));
        }

        #[test]
        fn missing_trailing_segments_stay_contained() {
            let (_tmp, root) = canonical_tempdir();
            let p = policy(&root);
            let physical = p.resolve_physical_path("not/yet/created").unwrap();
            assert_eq!(p.resolve_canonical_path(&physical), Some(physical.clone()));
        }

        #[test]
        fn symlink_escaping_root_is_rejected() {
            let (_tmp, root) = canonical_tempdir();
            symlink("/etc", root.join("link")).unwrap();

            let p = policy(&root);
            let physical = p.resolve_physical_path("link/passwd").unwrap();
            assert_eq!(p.resolve_canonical_path(&physical), None);
        }

        #[test]
        fn relative_symlink_escaping_root_is_rejected() {
            let (_tmp, root) = canonical_tempdir();
            std::fs::create_dir(root.join("sub")).unwrap();
            symlink("../../outside", root.join("sub/up")).unwrap();

            let p = policy(&root);
            let physical = p.resolve_physical_path("sub/up/file").unwrap();
            assert_eq!(p.resolve_canonical_path(&physical), None);
        }

        #[test]
        fn symlink_inside_root_is_followed() {
            let (_tmp, root) = canonical_tempdir();
            std::fs::create_dir(root.join("real")).unwrap();
            std::fs::write(root.join("real/a.txt"), b"hi").unwrap();
            symlink(root.join("real"), root.join("alias")).unwrap();

            let p = policy(&root);
            let physical = p.resolve_physical_path("alias/a.txt").unwrap();
            assert_eq!(
                p.resolve_canonical_path(&physical),
                Some(root.join("real/a.txt"))
            );
        }

        #[test]
        fn symlink_loop_is_rejected() {
            let (_tmp, root) = canonical_tempdir();
            symlink(root.join("b"), root.join("a")).unwrap();
            symlink(root.join("a"), root.join("b")).unwrap();

            let p = policy(&root);
            let physical = p.resolve_physical_path("a/file").unwrap();
            assert_eq!(p.resolve_canonical_path(&physical), None);
        }

        #[test]
        fn paths_outside_root_are_rejected_up_front() {
            let (_tmp, root) = canonical_tempdir();
            let p = policy(&root);
            assert_eq!(p.resolve_canonical_path(Path::new("/etc/passwd")), None);
        }
    }
}
