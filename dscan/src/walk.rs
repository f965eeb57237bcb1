//! Directory traversal seam.
//!
//! The scan drivers never read directories themselves: they receive
//! [`Visit`] notifications from a [`Walker`]. [`FsWalker`] is the default,
//! built on `walkdir`.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Why an entry was not handed to the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SkipReason {
    /// The entry could not be read or stat-ed.
    Unreadable,
    /// A directory below the depth limit was not entered.
    RecursionLimit,
    /// Device, socket, FIFO or other non-regular file.
    Special,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Unreadable => "can't access",
            Self::RecursionLimit => "recursion limit reached",
            Self::Special => "not supported file type",
        })
    }
}

/// One traversal notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Visit {
    /// The walk root is a directory. Sent before any of its entries.
    TopLevelDir(PathBuf),
    /// A regular file (or a symlink to one).
    File(PathBuf),
    /// An entry that will not be scanned.
    Skipped {
        /// Entry path.
        path: PathBuf,
        /// Why it was skipped.
        reason: SkipReason,
    },
}

/// Source of traversal notifications.
///
/// Returning [`ControlFlow::Break`] from `visit` ends the walk of `root`.
pub trait Walker {
    /// Walks `root`, descending at most `max_depth` directory levels
    /// (`None` for no limit).
    fn walk(
        &self,
        root: &Path,
        max_depth: Option<usize>,
        visit: &mut dyn FnMut(Visit) -> ControlFlow<()>,
    );
}

/// Shorthand for a [`Visit::Skipped`] notice.
const fn skip(path: PathBuf, reason: SkipReason) -> Visit {
    Visit::Skipped { path, reason }
}

/// Filesystem walker. Does not follow symlinked directories below the root.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsWalker;

impl Walker for FsWalker {
    fn walk(
        &self,
        root: &Path,
        max_depth: Option<usize>,
        visit: &mut dyn FnMut(Visit) -> ControlFlow<()>,
    ) {
        let mut entries = WalkDir::new(root)
            .follow_links(false)
            .follow_root_links(true)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = entries.next() {
            let (notice, descend) = match next {
                Err(e) => {
                    let path = e.path().unwrap_or(root).to_owned();
                    debug!(path = %path.display(), error = %e, "walk error");
                    (skip(path, SkipReason::Unreadable), true)
                }
                Ok(entry) => {
                    let depth = entry.depth();
                    let file_type = entry.file_type();
                    let path = entry.into_path();
                    if file_type.is_dir() {
                        let limited = max_depth.is_some_and(|max| depth >= max);
                        if depth == 0 {
                            if visit(Visit::TopLevelDir(path.clone())).is_break() {
                                return;
                            }
                            if !limited {
                                continue;
                            }
                        } else if !limited {
                            continue;
                        }
                        (skip(path, SkipReason::RecursionLimit), false)
                    } else if file_type.is_file() {
                        (Visit::File(path), true)
                    } else if file_type.is_symlink() {
                        match std::fs::metadata(&path) {
                            Ok(meta) if meta.is_file() => (Visit::File(path), true),
                            Ok(_) => {
                                debug!(path = %path.display(), "not following symlink");
                                continue;
                            }
                            Err(_) => (skip(path, SkipReason::Unreadable), true),
                        }
                    } else {
                        (skip(path, SkipReason::Special), true)
                    }
                }
            };

            if !descend {
                entries.skip_current_dir();
            }
            if visit(notice).is_break() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn collect(root: &Path, max_depth: Option<usize>) -> Vec<Visit> {
        let mut seen = Vec::new();
        FsWalker.walk(root, max_depth, &mut |v| {
            seen.push(v);
            ControlFlow::Continue(())
        });
        seen
    }

    fn tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a"), "a").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/b"), "b").unwrap();
        tmp
    }

    #[test]
    fn reports_root_then_files_in_order() {
        let tmp = tree();
        let root = tmp.path();
        assert_eq!(
            collect(root, None),
            [
                Visit::TopLevelDir(root.to_owned()),
                Visit::File(root.join("a")),
                Visit::File(root.join("sub/b")),
            ]
        );
    }

    #[test]
    fn single_file_root() {
        let tmp = tree();
        let file = tmp.path().join("a");
        assert_eq!(collect(&file, None), [Visit::File(file)]);
    }

    #[test]
    fn depth_limit_skips_subdirectories() {
        let tmp = tree();
        let root = tmp.path();
        assert_eq!(
            collect(root, Some(1)),
            [
                Visit::TopLevelDir(root.to_owned()),
                Visit::File(root.join("a")),
                Visit::Skipped {
                    path: root.join("sub"),
                    reason: SkipReason::RecursionLimit,
                },
            ]
        );
    }

    #[test]
    fn break_on_top_level_stops_walk() {
        let tmp = tree();
        let mut seen = Vec::new();
        FsWalker.walk(tmp.path(), None, &mut |v| {
            seen.push(v);
            ControlFlow::Break(())
        });
        assert_eq!(seen, [Visit::TopLevelDir(tmp.path().to_owned())]);
    }

    #[test]
    fn missing_root_is_unreadable() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("gone");
        assert_eq!(
            collect(&gone, None),
            [Visit::Skipped {
                path: gone,
                reason: SkipReason::Unreadable,
            }]
        );
    }

    #[cfg(unix)]
    #[test]
    fn fifo_is_special() {
        let tmp = tempfile::tempdir().unwrap();
        let fifo = tmp.path().join("pipe");
        nix::unistd::mkfifo(&fifo, nix::sys::stat::Mode::S_IRWXU).unwrap();
        assert!(collect(tmp.path(), None).contains(&Visit::Skipped {
            path: fifo,
            reason: SkipReason::Special,
        }));
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_file_is_scanned_but_symlinked_dir_is_not() {
        let tmp = tree();
        let root = tmp.path();
        std::os::unix::fs::symlink(root.join("a"), root.join("link-a")).unwrap();
        std::os::unix::fs::symlink(root.join("sub"), root.join("link-sub")).unwrap();
        let seen = collect(root, None);
        assert!(seen.contains(&Visit::File(root.join("link-a"))));
        let inside = root.join("link-sub");
        assert!(
            !seen
                .iter()
                .any(|v| matches!(v, Visit::File(p) if p.starts_with(&inside)))
        );
    }
}
