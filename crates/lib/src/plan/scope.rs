//! Working-directory resolution for image paths.
//!
//! Image paths are POSIX paths regardless of the host platform, so they are
//! handled as strings and normalized lexically.

/// Resolve `path` against the working directory `base`.
///
/// Absolute paths are normalized as-is; relative paths are joined onto
/// `base`. `.` components are dropped and `..` removes the previous
/// component, never climbing above `/`.
pub fn resolve(base: &str, path: &str) -> String {
  let joined = if path.starts_with('/') {
    path.to_string()
  } else {
    format!("{}/{}", base, path)
  };

  let mut parts: Vec<&str> = Vec::new();
  for component in joined.split('/') {
    match component {
      "" | "." => {}
      ".." => {
        parts.pop();
      }
      c => parts.push(c),
    }
  }

  format!("/{}", parts.join("/"))
}

/// Like [`resolve`], but keeps a trailing `/`, which marks a copy
/// destination as a directory.
pub fn resolve_destination(base: &str, path: &str) -> String {
  let resolved = resolve(base, path);
  if path.ends_with('/') && resolved != "/" {
    format!("{}/", resolved)
  } else {
    resolved
  }
}
