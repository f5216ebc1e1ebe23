//! CopyFile action implementation.

use std::fs;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::execute::types::StepError;

/// Copy `src` from the build context to the host path `target`.
///
/// If `into_dir` is set, or `target` is an existing directory, the source is
/// placed inside `target` under its own file name. Directories are copied
/// recursively; symlinks are recreated rather than followed.
///
/// `src` never leaves `context`: a leading `/` is dropped and a `..` that
/// climbs above the context is reported as [`StepError::SourceNotFound`].
pub fn copy_into(context: &Path, src: &str, target: &Path, into_dir: bool) -> Result<(), StepError> {
  let source = context_source(context, src).ok_or_else(|| StepError::SourceNotFound(src.to_string()))?;
  if source.symlink_metadata().is_err() {
    return Err(StepError::SourceNotFound(src.to_string()));
  }

  let dest = if into_dir || target.is_dir() {
    match source.file_name() {
      Some(name) => target.join(name),
      None => target.to_path_buf(),
    }
  } else {
    target.to_path_buf()
  };

  if source.is_dir() {
    copy_dir(&source, &dest)
  } else {
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent).map_err(|e| unwritable(parent, e))?;
    }
    fs::copy(&source, &dest).map_err(|e| unwritable(&dest, e))?;
    Ok(())
  }
}

/// Lexically resolve `src` beneath `context`.
fn context_source(context: &Path, src: &str) -> Option<PathBuf> {
  let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
  for component in Path::new(src).components() {
    match component {
      Component::Normal(part) => parts.push(part),
      Component::ParentDir => {
        parts.pop()?;
      }
      Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
    }
  }
  Some(parts.into_iter().fold(context.to_path_buf(), |path, part| path.join(part)))
}

fn copy_dir(source: &Path, dest: &Path) -> Result<(), StepError> {
  for entry in WalkDir::new(source).sort_by_file_name() {
    let entry = entry.map_err(|e| StepError::Io(e.into()))?;
    let rel = entry.path().strip_prefix(source).unwrap_or(entry.path());
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target).map_err(|e| unwritable(&target, e))?;
    } else if file_type.is_symlink() {
      let link = fs::read_link(entry.path())?;
      symlink(&link, &target).map_err(|e| unwritable(&target, e))?;
    } else {
      fs::copy(entry.path(), &target).map_err(|e| unwritable(&target, e))?;
    }
  }
  Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> std::io::Result<()> {
  std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn symlink(link: &Path, target: &Path) -> std::io::Result<()> {
  std::os::windows::fs::symlink_file(link, target)
}

fn unwritable(path: &Path, e: std::io::Error) -> StepError {
  StepError::DestinationUnwritable {
    path: path.display().to_string(),
    message: e.to_string(),
  }
}

/// Remove a path (file, directory, or symlink). A missing path is not an
/// error.
pub fn remove_path(path: &Path) -> std::io::Result<()> {
  let meta = match path.symlink_metadata() {
    Ok(meta) => meta,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(e),
  };
  if meta.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  }
}
