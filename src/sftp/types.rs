//! SFTP data types

use serde::{Deserialize, Serialize};

/// Directory entry / stat result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// File name (not full path)
    pub name: String,
    /// Full path
    pub path: String,
    /// Entry kind
    pub kind: FileType,
    /// File size in bytes
    pub size: u64,
    /// Last modified time (Unix timestamp)
    pub modified: i64,
    /// Permission bits as an octal string, e.g. "755"
    pub permissions: String,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    File,
    Directory,
    Symlink,
    Other,
}

/// Transfer direction; downloads arrive as one payload and report no progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
}

/// Byte progress of one transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub direction: TransferDirection,
    pub remote_path: String,
    /// Bytes transferred so far
    pub transferred: u64,
    /// Total bytes to transfer
    pub total: u64,
}

/// Directories first, then case-insensitive by name
pub fn sort_entries(entries: &mut [FileInfo]) {
    entries.sort_by(|a, b| {
        let a_is_dir = a.is_dir();
        let b_is_dir = b.is_dir();

        if a_is_dir != b_is_dir {
            return b_is_dir.cmp(&a_is_dir);
        }

        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: FileType) -> FileInfo {
        FileInfo {
            name: name.to_string(),
            path: format!("/{}", name),
            kind,
            size: 0,
            modified: 0,
            permissions: "644".to_string(),
        }
    }

    #[test]
    fn test_sort_directories_first() {
        let mut entries = vec![
            entry("zeta.txt", FileType::File),
            entry("beta", FileType::Directory),
            entry("Alpha.txt", FileType::File),
            entry("link", FileType::Symlink),
            entry("alpha", FileType::Directory),
        ];
        sort_entries(&mut entries);

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta", "Alpha.txt", "link", "zeta.txt"]);
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_value(entry("logs", FileType::Directory)).unwrap();
        assert_eq!(json["kind"], "directory");
        assert_eq!(json["permissions"], "644");
        assert_eq!(json["name"], "logs");
    }
}
