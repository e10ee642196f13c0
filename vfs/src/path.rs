use crate::VfsError;

/// How mount-point prefixes are compared against virtual paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CasePolicy {
    /// Prefixes match byte for byte.
    #[default]
    Sensitive,
    /// Prefixes match ignoring ASCII case.
    Insensitive,
}

/// The root of the virtual namespace.
pub const ROOT: &str = "/";

/// Normalize a virtual path into its absolute form.
///
/// - Replaces backslashes with forward slashes
/// - Joins a relative path onto `cwd`
/// - Collapses redundant separators (`a///b` → `a/b`)
/// - Drops `.` segments and resolves `..` against the preceding segment
/// - Strips the trailing slash
///
/// The result is either `"/"` or `"/a/b"`. Returns `Err(VfsError::InvalidPath)`
/// for an empty path or a `..` that climbs above the root.
pub fn normalize(path: &str, cwd: &str) -> Result<String, VfsError> {
    if path.is_empty() {
        return Err(VfsError::InvalidPath("empty path".into()));
    }
    let replaced = path.replace('\\', "/");
    let joined = if replaced.starts_with('/') {
        replaced
    } else {
        format!("{cwd}/{replaced}")
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(VfsError::InvalidPath(format!(
                        "{path}: path escapes the root"
                    )));
                }
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return Ok(ROOT.to_owned());
    }
    Ok(format!("/{}", segments.join("/")))
}

/// Normalize a mount point, applying the case policy.
pub(crate) fn normalize_mount_point(point: &str, policy: CasePolicy) -> Result<String, VfsError> {
    let normalized = normalize(point, ROOT)?;
    Ok(match policy {
        CasePolicy::Sensitive => normalized,
        CasePolicy::Insensitive => normalized.to_ascii_lowercase(),
    })
}

/// Compute the mount-relative remainder of `path` under `prefix`.
///
/// Both arguments must be normalized. Returns `Some("")` when `path` is the
/// mount point itself, `Some("a/b")` for a descendant and `None` when the
/// prefix does not cover the path. Partial segment matches (`/dat` against
/// `/data`) never count.
pub fn local_path<'a>(path: &'a str, prefix: &str, policy: CasePolicy) -> Option<&'a str> {
    if prefix == ROOT {
        return Some(&path[1..]);
    }
    if path.len() < prefix.len() || !path.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, rest) = path.split_at(prefix.len());
    let matches = match policy {
        CasePolicy::Sensitive => head == prefix,
        CasePolicy::Insensitive => head.eq_ignore_ascii_case(prefix),
    };
    if !matches {
        return None;
    }
    if rest.is_empty() {
        Some("")
    } else {
        rest.strip_prefix('/')
    }
}

/// Join a child name onto a normalized directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Join two mount-relative paths, either of which may be empty.
pub(crate) fn join_local(dir: &str, name: &str) -> String {
    match (dir.is_empty(), name.is_empty()) {
        (true, _) => name.to_owned(),
        (false, true) => dir.to_owned(),
        (false, false) => format!("{dir}/{name}"),
    }
}

/// Parent of a normalized path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT || path.is_empty() {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT),
        Some(pos) => Some(&path[..pos]),
        None => Some(""),
    }
}

/// Final segment of a path. The root (and an empty local path) has no name.
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// If `point` lies strictly below `dir`, the name of the first segment
/// after `dir`. Used to surface mount points as implicit directories.
pub(crate) fn child_toward(dir: &str, point: &str, policy: CasePolicy) -> Option<String> {
    let rest = local_path(point, dir, policy)?;
    if rest.is_empty() {
        return None;
    }
    Some(match rest.find('/') {
        Some(pos) => rest[..pos].to_owned(),
        None => rest.to_owned(),
    })
}
