//! Safe download-path resolution.
//!
//! An API-requested path is mapped onto the real filesystem only
//! through whitelisted roots (`tasks`, `uploads`, `static`); anything
//! with a `..` component or escaping its root is rejected before any
//! filesystem access happens.

use std::path::{Path, PathBuf};

use redub_core::appdirs::{clean, AppPaths};

pub const STATIC_ROOT: &str = "static";

/// The roots a download may resolve into, in alias order.
#[derive(Debug, Clone)]
pub struct DownloadRoots {
    pub tasks: Vec<PathBuf>,
    pub uploads: Vec<PathBuf>,
    pub statics: Vec<PathBuf>,
}

impl DownloadRoots {
    /// Production roots: the resolved app dirs plus the relative
    /// fallbacks kept for pre-appdirs task layouts.
    pub fn from_paths(paths: &AppPaths) -> Self {
        Self {
            tasks: unique(vec![paths.task_root(), PathBuf::from("tasks")]),
            uploads: unique(vec![paths.upload_root(), PathBuf::from("uploads")]),
            statics: vec![PathBuf::from(STATIC_ROOT)],
        }
    }

    fn aliased(&self) -> [(&'static str, &[PathBuf]); 3] {
        [
            ("tasks", self.tasks.as_slice()),
            ("uploads", self.uploads.as_slice()),
            ("static", self.statics.as_slice()),
        ]
    }
}

fn unique(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();
    for path in paths {
        let cleaned = clean(&path);
        if !out.contains(&cleaned) {
            out.push(cleaned);
        }
    }
    out
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    /// `false` means the candidate is valid but no file exists there;
    /// the caller answers 404.
    pub found: bool,
}

/// Resolve a requested path against the whitelisted roots. `None`
/// means the request is invalid (traversal or no candidate at all) and
/// the caller answers 403.
pub fn resolve_download_path(roots: &DownloadRoots, requested: &str) -> Option<Resolved> {
    let requested = requested
        .trim()
        .trim_start_matches(['/', '\\'])
        .to_owned();
    if has_parent_traversal(&requested) {
        return None;
    }
    let cleaned = clean(Path::new(&requested));
    let requested = if cleaned == Path::new(".") {
        String::new()
    } else {
        cleaned.to_string_lossy().replace('\\', "/")
    };

    // Match the first segment against an alias; the alias prefix is
    // stripped before joining with that alias's roots.
    let mut matched_alias = None;
    let mut relative = requested.clone();
    for (alias, _) in roots.aliased() {
        if requested == alias {
            matched_alias = Some(alias);
            relative = String::new();
            break;
        }
        if let Some(rest) = requested.strip_prefix(&format!("{alias}/")) {
            matched_alias = Some(alias);
            relative = rest.to_owned();
            break;
        }
    }

    let mut fallback: Option<PathBuf> = None;
    for (alias, dirs) in roots.aliased() {
        if let Some(matched) = matched_alias {
            if alias != matched {
                continue;
            }
        }
        let join_with = if matched_alias == Some(alias) {
            &relative
        } else {
            &requested
        };

        for root in dirs {
            let candidate = clean(&root.join(join_with));
            if !is_within_root(root, &candidate) {
                continue;
            }
            if fallback.is_none() {
                fallback = Some(candidate.clone());
            }
            if candidate.is_file() {
                return Some(Resolved {
                    path: candidate,
                    found: true,
                });
            }
        }
    }

    fallback.map(|path| Resolved { path, found: false })
}

fn has_parent_traversal(path: &str) -> bool {
    path.replace('\\', "/")
        .split('/')
        .any(|segment| segment == "..")
}

fn is_within_root(root: &Path, candidate: &Path) -> bool {
    let root = clean(root);
    let candidate = clean(candidate);
    match candidate.strip_prefix(&root) {
        Ok(_) => true,
        Err(_) => candidate == root,
    }
}
