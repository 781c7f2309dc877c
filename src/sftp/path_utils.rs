//! Remote path helpers
//!
//! Remote SFTP paths always use `/` as separator (per SFTP protocol), even
//! when the server runs on Windows.

/// Check if a remote SFTP path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Last path component, or the path itself when it has none
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(path)
}

/// Every prefix of `path`, shortest first, for creating directories one level at a time.
///
/// Empty and `.` components are skipped: `a//b/./c` yields `a`, `a/b`, `a/b/c`.
pub fn component_prefixes(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = if is_absolute_remote_path(path) {
        "/".to_string()
    } else {
        String::new()
    };

    for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
        current = if current.is_empty() {
            component.to_string()
        } else {
            join_remote_path(&current, component)
        };
        prefixes.push(current.clone());
    }

    prefixes
}
