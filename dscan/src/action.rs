//! Actions applied to infected files.
//!
//! Failures never abort a scan: they are logged and counted in the
//! [`Tally`] (`not_removed` / `not_moved`).

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tracing::{debug, info, warn};

use crate::tally::Tally;

/// Highest numeric suffix tried when the quarantine name is taken.
const MAX_SUFFIX: u16 = 999;

/// What to do with an infected file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum Action {
    /// Report only.
    #[default]
    None,
    /// Unlink the file.
    Remove,
    /// Copy the file into a quarantine directory, leaving the original.
    Copy(PathBuf),
    /// Move the file into a quarantine directory.
    Move(PathBuf),
}

impl Action {
    /// Returns `true` if infected files are left alone.
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Applies the action to `path`, counting failures in `tally`.
    pub fn apply(&self, path: &Path, tally: &mut Tally) {
        match self {
            Self::None => {}
            Self::Remove => match fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "removed"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "can't remove");
                    tally.not_removed += 1;
                }
            },
            Self::Copy(dir) => quarantine(path, dir, false, tally),
            Self::Move(dir) => quarantine(path, dir, true, tally),
        }
    }
}

/// Why a file could not be quarantined.
#[derive(Debug, thiserror::Error)]
enum QuarantineError {
    /// Directory missing, not writable or not searchable.
    #[error("quarantine directory {} is not writable: {source}", dir.display())]
    TargetDir {
        /// Quarantine directory.
        dir: PathBuf,
        /// Failure from `access(2)`.
        source: io::Error,
    },

    /// The infected file could not be examined.
    #[error("can't stat {}: {source}", path.display())]
    Stat {
        /// Infected file.
        path: PathBuf,
        /// Underlying failure.
        source: io::Error,
    },

    /// The path ends in `..` or is a root.
    #[error("{} has no file name", path.display())]
    NoFileName {
        /// Infected file.
        path: PathBuf,
    },

    /// Every `.000` to `.999` name is taken.
    #[error("no free name for {} in {}", name.to_string_lossy(), dir.display())]
    Exhausted {
        /// Base file name.
        name: OsString,
        /// Quarantine directory.
        dir: PathBuf,
    },

    /// Copying the contents failed; no partial copy is left behind.
    #[error("can't copy to {}: {source}", target.display())]
    Transfer {
        /// Intended quarantine path.
        target: PathBuf,
        /// Underlying failure.
        source: io::Error,
    },

    /// The copy succeeded; only the source removal of a move failed.
    #[error("copied to {} but can't remove the original: {source}", target.display())]
    Unlink {
        /// Quarantine path now holding the copy.
        target: PathBuf,
        /// Underlying failure.
        source: io::Error,
    },
}

/// Result of a successful quarantine.
#[derive(Debug)]
enum Placed {
    /// The file now lives at this path.
    At(PathBuf),
    /// The target already is this very file.
    AlreadyThere(PathBuf),
}

/// Copies or moves `src` into `dir` and logs the outcome.
fn quarantine(src: &Path, dir: &Path, mv: bool, tally: &mut Tally) {
    account(src, mv, place(src, dir, mv), tally);
}

/// Logs a quarantine outcome and counts failures.
fn account(
    src: &Path,
    mv: bool,
    outcome: Result<Placed, QuarantineError>,
    tally: &mut Tally,
) {
    match outcome {
        Ok(Placed::At(target)) => {
            let verb = if mv { "moved" } else { "copied" };
            info!(
                path = %src.display(),
                target = %target.display(),
                "{verb} to quarantine"
            );
        }
        Ok(Placed::AlreadyThere(target)) => {
            info!(
                path = %src.display(),
                target = %target.display(),
                "file excluded: already in quarantine"
            );
        }
        Err(e @ QuarantineError::Unlink { .. }) => {
            warn!(path = %src.display(), error = %e, "can't finish move");
            tally.not_removed += 1;
        }
        Err(e) => {
            warn!(path = %src.display(), error = %e, "can't quarantine");
            tally.not_moved += 1;
        }
    }
}

/// Picks the target name and transfers the file.
fn place(src: &Path, dir: &Path, mv: bool) -> Result<Placed, QuarantineError> {
    check_dir(dir)?;
    let meta = fs::metadata(src).map_err(|source| QuarantineError::Stat {
        path: src.to_owned(),
        source,
    })?;
    let name = src.file_name().ok_or_else(|| QuarantineError::NoFileName {
        path: src.to_owned(),
    })?;

    let mut target = dir.join(name);
    if let Ok(existing) = fs::symlink_metadata(&target) {
        if same_file(&meta, &existing) {
            return Ok(Placed::AlreadyThere(target));
        }
        target = free_name(dir, name)?;
    }

    if mv {
        match fs::rename(src, &target) {
            Ok(()) => return Ok(Placed::At(target)),
            Err(e) => debug!(error = %e, "rename failed, copying instead"),
        }
        copy_then_unlink(src, &target, &meta)?;
    } else {
        copy_preserving(src, &target, &meta)?;
    }
    Ok(Placed::At(target))
}

/// Moves `src` to `target` where a rename is not possible.
fn copy_then_unlink(
    src: &Path,
    target: &Path,
    meta: &fs::Metadata,
) -> Result<(), QuarantineError> {
    copy_preserving(src, target, meta)?;
    fs::remove_file(src).map_err(|source| QuarantineError::Unlink {
        target: target.to_owned(),
        source,
    })
}

/// The directory must accept new entries.
#[cfg(unix)]
fn check_dir(dir: &Path) -> Result<(), QuarantineError> {
    use nix::unistd::{AccessFlags, access};

    access(dir, AccessFlags::W_OK | AccessFlags::X_OK).map_err(|errno| {
        QuarantineError::TargetDir {
            dir: dir.to_owned(),
            source: io::Error::from(errno),
        }
    })
}

#[cfg(not(unix))]
fn check_dir(dir: &Path) -> Result<(), QuarantineError> {
    let target_dir = |source| QuarantineError::TargetDir {
        dir: dir.to_owned(),
        source,
    };
    let meta = fs::metadata(dir).map_err(target_dir)?;
    if !meta.is_dir() || meta.permissions().readonly() {
        return Err(target_dir(io::Error::from(io::ErrorKind::PermissionDenied)));
    }
    Ok(())
}

/// Same device and inode.
#[cfg(unix)]
fn same_file(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_: &fs::Metadata, _: &fs::Metadata) -> bool {
    false
}

/// First `name.NNN` in `dir` that does not exist yet.
fn free_name(dir: &Path, name: &std::ffi::OsStr) -> Result<PathBuf, QuarantineError> {
    for n in 0..=MAX_SUFFIX {
        let mut numbered = name.to_owned();
        numbered.push(format!(".{n:03}"));
        let candidate = dir.join(numbered);
        match fs::symlink_metadata(&candidate) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidate),
            _ => {}
        }
    }
    Err(QuarantineError::Exhausted {
        name: name.to_owned(),
        dir: dir.to_owned(),
    })
}

/// Copies contents and mode bits, then ownership and times on a best-effort
/// basis.
fn copy_preserving(
    src: &Path,
    target: &Path,
    meta: &fs::Metadata,
) -> Result<(), QuarantineError> {
    // fs::copy carries the permission bits over.
    if let Err(source) = fs::copy(src, target) {
        let _ = fs::remove_file(target);
        return Err(QuarantineError::Transfer {
            target: target.to_owned(),
            source,
        });
    }
    preserve_metadata(target, meta);
    Ok(())
}

/// Gives `target` the owner and timestamps recorded in `meta`. Failures are
/// logged only.
fn preserve_metadata(target: &Path, meta: &fs::Metadata) {
    #[cfg(unix)]
    {
        use nix::unistd::{Gid, Uid, chown};
        use std::os::unix::fs::MetadataExt;

        let owner = Some(Uid::from_raw(meta.uid()));
        let group = Some(Gid::from_raw(meta.gid()));
        if let Err(errno) = chown(target, owner, group) {
            warn!(target = %target.display(), error = %errno, "can't preserve ownership");
        }
    }

    let atime = FileTime::from_last_access_time(meta);
    let mtime = FileTime::from_last_modification_time(meta);
    if let Err(e) = filetime::set_file_times(target, atime, mtime) {
        warn!(target = %target.display(), error = %e, "can't preserve timestamps");
    }
}
