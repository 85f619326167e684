use std::fmt::Display;
use std::fs;
use std::io;
use std::time::Instant;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::Style;
use glob::{MatchOptions, Pattern};

use crate::error::SourceError;

const ANSI_BLUE: Style = Style::new().blue();

/// `*` and `?` never cross a path separator, `**` spans directories.
pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Lists files under `root` matching the project-relative `pattern`, in
/// lexical order. Directories are skipped.
pub fn find(root: &Utf8Path, pattern: &str) -> Result<Vec<Utf8PathBuf>, SourceError> {
    let full = format!("{}/{}", Pattern::escape(root.as_str()), pattern);

    let mut paths = Vec::new();
    for path in glob::glob_with(&full, MATCH_OPTIONS)? {
        let path = Utf8PathBuf::try_from(path?)?;
        if path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Lexically resolves `.` and `..` components without touching the
/// filesystem, so symlinks are not followed.
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut ret = Utf8PathBuf::new();

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) || !ret.pop() && !ret.has_root() {
                    ret.push(Utf8Component::ParentDir);
                }
            }
            other => ret.push(other.as_str()),
        }
    }

    ret
}

/// Deletes a directory tree. A missing directory is not an error; returns
/// whether anything was removed.
pub fn remove_dir(path: &Utf8Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Writes a file, creating its parent directories.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}

/// Whether `src` was modified after `dst`, or `dst` does not exist.
pub fn is_newer(src: &Utf8Path, dst: &Utf8Path) -> io::Result<bool> {
    let dst = match fs::metadata(dst) {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };

    Ok(fs::metadata(src)?.modified()? > dst)
}

/// Copies each file into `dir` under its own name, skipping files whose
/// destination copy is at least as recent. Returns the number copied.
pub fn copy_newer(files: &[Utf8PathBuf], dir: &Utf8Path) -> io::Result<usize> {
    fs::create_dir_all(dir)?;

    let mut copied = 0;
    for file in files {
        let Some(name) = file.file_name() else {
            continue;
        };

        let dst = dir.join(name);
        if is_newer(file, &dst)? {
            fs::copy(file, &dst)?;
            copied += 1;
        }
    }

    Ok(copied)
}
