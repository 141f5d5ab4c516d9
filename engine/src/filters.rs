//! Wildcard filters deciding whether a new process gets injected.

use std::path::Path;
use wildmatch::WildMatch;

/// Outcome of evaluating a newly created process against the filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionDecision {
    /// Inject; keep the primary thread suspended until the code-loading
    /// collaborator finishes attaching (or the deadline expires).
    InjectAndHold,
    /// Inject, but resume the primary thread immediately. Used for
    /// processes that cannot tolerate staying suspended while the
    /// attachment handshake runs.
    InjectAndResume,
    /// Leave the process exactly as the unhooked call would have.
    Skip,
}

/// A `|`-separated list of wildcard patterns.
///
/// Matching is case-insensitive and path-aware: a pattern matches if it
/// matches the full image path or any suffix of it starting at a path
/// separator, so `system32\*` matches `C:\Windows\System32\notepad.exe`
/// and a bare `notepad.exe` matches just the file name.
#[derive(Debug, Clone)]
struct PatternSet {
    patterns: Vec<WildMatch>,
}

impl PatternSet {
    fn parse(spec: &str) -> Self {
        let patterns = spec
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| WildMatch::new(&normalize(p)))
            .collect();
        Self { patterns }
    }

    fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    fn matches_path(&self, normalized_path: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            if pattern.matches(normalized_path) {
                return true;
            }
            normalized_path
                .char_indices()
                .filter(|&(_, c)| c == '\\')
                .any(|(i, _)| pattern.matches(&normalized_path[i + 1..]))
        })
    }
}

fn normalize(value: &str) -> String {
    value.replace('/', "\\").to_lowercase()
}

/// The include / exclude / thread-attach-exempt pattern triple supplied by
/// external configuration.
#[derive(Debug, Clone)]
pub struct InjectionFilters {
    include: PatternSet,
    exclude: PatternSet,
    thread_attach_exempt: PatternSet,
}

impl InjectionFilters {
    /// Compiles the three pattern lists. An empty include list means
    /// "match everything"; empty exclude and exempt lists match nothing.
    pub fn new(include: &str, exclude: &str, thread_attach_exempt: &str) -> Self {
        Self {
            include: PatternSet::parse(include),
            exclude: PatternSet::parse(exclude),
            thread_attach_exempt: PatternSet::parse(thread_attach_exempt),
        }
    }

    /// Evaluates the filters against a resolved image path.
    pub fn decide(&self, image_path: &Path) -> InjectionDecision {
        let normalized = normalize(&image_path.to_string_lossy());

        let included = self.include.is_empty() || self.include.matches_path(&normalized);
        if !included || self.exclude.matches_path(&normalized) {
            return InjectionDecision::Skip;
        }

        if self.thread_attach_exempt.matches_path(&normalized) {
            InjectionDecision::InjectAndResume
        } else {
            InjectionDecision::InjectAndHold
        }
    }
}

impl Default for InjectionFilters {
    /// Match everything, exclude nothing, exempt nothing.
    fn default() -> Self {
        Self::new("", "", "")
    }
}
