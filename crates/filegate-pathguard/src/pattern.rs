//! Glob matching for hide patterns.
//!
//! Patterns are matched segment-wise against root-relative paths. Within a
//! segment, `*` matches any run of characters and `?` exactly one. A segment
//! consisting of `**` matches one or more whole path segments; the caller
//! appends an empty trailing segment for directories so `secret/**` also
//! covers the `secret` directory itself.

use std::collections::HashMap;

pub(crate) fn glob_match(pattern: &[&str], path: &[&str]) -> bool {
    let mut memo = HashMap::new();
    match_segments(pattern, path, 0, 0, &mut memo)
}

fn match_segments(
    pattern: &[&str],
    path: &[&str],
    pi: usize,
    si: usize,
    memo: &mut HashMap<(usize, usize), bool>,
) -> bool {
    if let Some(&hit) = memo.get(&(pi, si)) {
        return hit;
    }

    let result = if pi == pattern.len() {
        si == path.len()
    } else if pattern[pi] == "**" {
        // One-or-more segments. Zero-width `**` would make the trailing-slash
        // directory form redundant and hide plain files named like the
        // pattern prefix.
        si < path.len()
            && (match_segments(pattern, path, pi + 1, si + 1, memo)
                || match_segments(pattern, path, pi, si + 1, memo))
    } else {
        si < path.len()
            && segment_match(pattern[pi], path[si])
            && match_segments(pattern, path, pi + 1, si + 1, memo)
    };

    memo.insert((pi, si), result);
    result
}

/// Single-segment wildcard match (`*`, `?`, literals).
fn segment_match(pattern: &str, segment: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let seg: Vec<char> = segment.chars().collect();
    let mut memo = HashMap::new();
    match_chars(&pat, &seg, 0, 0, &mut memo)
}

fn match_chars(
    pat: &[char],
    seg: &[char],
    pi: usize,
    si: usize,
    memo: &mut HashMap<(usize, usize), bool>,
) -> bool {
    if let Some(&hit) = memo.get(&(pi, si)) {
        return hit;
    }

    let result = if pi == pat.len() {
        si == seg.len()
    } else {
        match pat[pi] {
            '*' => {
                match_chars(pat, seg, pi + 1, si, memo)
                    || (si < seg.len() && match_chars(pat, seg, pi, si + 1, memo))
            }
            '?' => si < seg.len() && match_chars(pat, seg, pi + 1, si + 1, memo),
            c => si < seg.len() && seg[si] == c && match_chars(pat, seg, pi + 1, si + 1, memo),
        }
    };

    memo.insert((pi, si), result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_segments() {
        assert!(glob_match(&["a", "b"], &["a", "b"]));
        assert!(!glob_match(&["a", "b"], &["a"]));
        assert!(!glob_match(&["a"], &["a", "b"]));
    }

    #[test]
    fn star_and_question_within_segment() {
        assert!(glob_match(&["*.log"], &["app.log"]));
        assert!(glob_match(&["*"], &["anything"]));
        assert!(glob_match(&["a?c"], &["abc"]));
        assert!(!glob_match(&["a?c"], &["ac"]));
        assert!(!glob_match(&["*.log"], &["app.log", "nested"]));
    }

    #[test]
    fn double_star_spans_segments() {
        assert!(glob_match(&["secret", "**"], &["secret", "a"]));
        assert!(glob_match(&["secret", "**"], &["secret", "a", "b.txt"]));
        assert!(!glob_match(&["secret", "**"], &["secret"]));
        assert!(glob_match(&["secret", "**"], &["secret", ""]));
        assert!(glob_match(&["**", "core"], &["a", "b", "core"]));
        assert!(!glob_match(&["**", "core"], &["core"]));
    }

    #[test]
    fn pathological_star_runs_terminate() {
        let pattern = vec!["*a*a*a*a*a*a*a*a*a*a*a*a*a*a*a*a*b"];
        let path = vec!["aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"];
        assert!(!glob_match(&pattern, &path));
    }
}
