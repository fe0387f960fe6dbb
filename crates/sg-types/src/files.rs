use serde::{Deserialize, Serialize};

/// Metadata for one remote file or directory, as returned by the file
/// channel's `list` and `stat` operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileInfo {
    pub name: String,
    /// Absolute path on the remote host.
    pub path: String,
    pub size: u64,
    /// Unix-style mode string, e.g. `drwxr-xr-x`.
    pub mode: String,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    pub is_dir: bool,
}

/// Sort a listing the way the file browser expects: directories first,
/// then lexicographically by name within each group.
pub fn sort_listing(entries: &mut [RemoteFileInfo]) {
    entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool) -> RemoteFileInfo {
        RemoteFileInfo {
            name: name.to_string(),
            path: format!("/home/{name}"),
            size: 0,
            mode: String::new(),
            mtime: 0,
            is_dir,
        }
    }

    #[test]
    fn directories_sort_before_files() {
        let mut listing = vec![
            entry("zebra.txt", false),
            entry("alpha.txt", false),
            entry("var", true),
            entry("etc", true),
        ];
        sort_listing(&mut listing);
        let names: Vec<&str> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["etc", "var", "alpha.txt", "zebra.txt"]);
    }
}
