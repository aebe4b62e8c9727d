//! Gitignore-style ignore matcher (C5) over relative paths.
//!
//! No crate in the retrieved pack offers a bare pattern-over-relative-path
//! matcher (the ecosystem's `ignore` crate is a directory-walker, not a
//! standalone matcher) — this module is hand-rolled glob-to-matcher logic,
//! scoped narrowly to the feature set spec §4.5 names (see DESIGN.md).
use std::path::Path;

const METADATA_DIR: &str = ".swarm-vault";

#[derive(Debug, Clone)]
struct Pattern {
    negated: bool,
    dir_only: bool,
    /// Anchored to the root (contained a `/` before the final segment, other
    /// than a trailing one), as opposed to matching at any depth.
    anchored: bool,
    segments: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a `.swarmignore` file at the managed root, if present.
    pub fn load(managed_root: &Path) -> std::io::Result<Self> {
        let path = managed_root.join(".swarmignore");
        if !path.exists() {
            return Ok(Self::empty());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut patterns = Vec::new();
        for raw_line in content.lines() {
            let line = raw_line.trim_end();
            if line.is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let mut rule = line;
            let negated = rule.starts_with('!');
            if negated {
                rule = &rule[1..];
            }
            let dir_only = rule.ends_with('/');
            if dir_only {
                rule = &rule[..rule.len() - 1];
            }
            let anchored = rule.contains('/') && !rule.starts_with("**/");
            let rule = rule.strip_prefix('/').unwrap_or(rule);
            let segments = rule.split('/').map(str::to_string).collect();
            patterns.push(Pattern {
                negated,
                dir_only,
                anchored,
                segments,
            });
        }
        Self { patterns }
    }

    /// True if `relative_path` (forward-slash separated, relative to the
    /// managed root) should be excluded from the manifest.
    pub fn is_ignored(&self, relative_path: &str, is_directory: bool) -> bool {
        if is_always_ignored(relative_path) {
            return true;
        }

        let path_segments: Vec<&str> = relative_path.split('/').collect();
        let mut ignored = false;
        for pattern in &self.patterns {
            if pattern.dir_only && !is_directory && !path_has_ignored_ancestor(pattern, &path_segments) {
                continue;
            }
            if pattern_matches(pattern, &path_segments) {
                ignored = !pattern.negated;
            }
        }
        ignored
    }
}

fn is_always_ignored(relative_path: &str) -> bool {
    let file_name = relative_path.rsplit('/').next().unwrap_or(relative_path);

    if file_name.starts_with('.') && file_name != METADATA_DIR {
        return true;
    }
    if relative_path == METADATA_DIR || relative_path.starts_with(&format!("{METADATA_DIR}/")) {
        // The metadata directory itself is whitelisted from the leading-dot
        // rule above, but its *contents* (state store DB, legacy snapshot)
        // are still never synced.
        return true;
    }
    if file_name == "Thumbs.db" || file_name == ".DS_Store" || file_name == "desktop.ini" {
        return true;
    }
    if file_name.ends_with(".tmp") || file_name.ends_with(".swarmtmp") || file_name.ends_with('~') {
        return true;
    }
    false
}

fn path_has_ignored_ancestor(pattern: &Pattern, path_segments: &[&str]) -> bool {
    // A dir_only pattern with no own match for a *file* only applies if one
    // of the file's ancestor directories matches the pattern.
    for depth in 1..path_segments.len() {
        if pattern_matches(pattern, &path_segments[..depth]) {
            return true;
        }
    }
    false
}

fn pattern_matches(pattern: &Pattern, path_segments: &[&str]) -> bool {
    if pattern.anchored {
        match_from(&pattern.segments, path_segments)
    } else {
        // Unanchored: try matching the pattern against every suffix of the path.
        (0..path_segments.len()).any(|start| match_from(&pattern.segments, &path_segments[start..]))
    }
}

fn match_from(pattern_segments: &[String], path_segments: &[&str]) -> bool {
    match_segments(pattern_segments, path_segments)
}

fn match_segments(pattern: &[String], path: &[&str]) -> bool {
    if pattern.is_empty() {
        return path.is_empty();
    }
    if pattern[0] == "**" {
        if pattern.len() == 1 {
            return true;
        }
        for i in 0..=path.len() {
            if match_segments(&pattern[1..], &path[i..]) {
                return true;
            }
        }
        return false;
    }
    if path.is_empty() {
        return false;
    }
    glob_segment_matches(&pattern[0], path[0]) && match_segments(&pattern[1..], &path[1..])
}

/// Single-path-segment glob: `*` and `?` wildcards, no `/`.
fn glob_segment_matches(glob: &str, text: &str) -> bool {
    fn inner(g: &[u8], t: &[u8]) -> bool {
        match (g.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                inner(&g[1..], t) || (!t.is_empty() && inner(g, &t[1..]))
            }
            (Some(b'?'), Some(_)) => inner(&g[1..], &t[1..]),
            (Some(gc), Some(tc)) if gc == tc => inner(&g[1..], &t[1..]),
            _ => false,
        }
    }
    inner(glob.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_ignores_metadata_and_dotfiles() {
        let m = IgnoreMatcher::empty();
        assert!(m.is_ignored(".git", true));
        assert!(m.is_ignored(".swarm-vault/state.redb", false));
        assert!(!m.is_ignored(".swarm-vault", true));
        assert!(m.is_ignored("notes.txt.tmp", false));
    }

    #[test]
    fn simple_glob_pattern() {
        let m = IgnoreMatcher::parse("*.log\nbuild/\n");
        assert!(m.is_ignored("debug.log", false));
        assert!(!m.is_ignored("debug.logger", false));
        assert!(m.is_ignored("build", true));
        assert!(m.is_ignored("build/output.bin", false));
    }

    #[test]
    fn double_star_matches_any_depth() {
        let m = IgnoreMatcher::parse("**/node_modules\n");
        assert!(m.is_ignored("node_modules", true));
        assert!(m.is_ignored("pkg/node_modules", true));
        assert!(m.is_ignored("pkg/sub/node_modules", true));
    }

    #[test]
    fn negation_overrides_earlier_match() {
        let m = IgnoreMatcher::parse("*.txt\n!important.txt\n");
        assert!(m.is_ignored("draft.txt", false));
        assert!(!m.is_ignored("important.txt", false));
    }

    #[test]
    fn anchored_pattern_only_matches_root() {
        let m = IgnoreMatcher::parse("/secrets.txt\n");
        assert!(m.is_ignored("secrets.txt", false));
        assert!(!m.is_ignored("sub/secrets.txt", false));
    }
}
