//! Snapshots the operator's migration configuration directory into the
//! request payload.
//!
//! The layout mirrors what the workers expect: `source/` and `target/`
//! hold cluster configuration files (base64-encoded, keyed by relative
//! path), `data/imap_names.txt` and `data/replicated_map_names.txt` list
//! the data structures to migrate, and `data/path.txt` carries the
//! original configuration path. Names starting with `.` are skipped.

use std::collections::BTreeSet;
use std::fs;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One file captured from the configuration directory.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BundleFile {
    /// Path relative to the walked directory.
    pub name: String,
    /// Base64-encoded file contents.
    pub content: String,
}

/// Serializable snapshot of a migration configuration directory.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigBundle {
    /// Original configuration path, verbatim from `data/path.txt`.
    pub config_path: String,
    /// Files under `source/`.
    pub source: Vec<BundleFile>,
    /// Files under `target/`.
    pub target: Vec<BundleFile>,
    /// Map names to migrate, deduplicated and sorted.
    pub imaps: Vec<String>,
    /// Replicated map names to migrate, deduplicated and sorted.
    pub replicated_maps: Vec<String>,
}

/// Errors raised while reading the configuration directory.
#[derive(Debug, Error)]
pub enum BundleError {
    /// A file or directory could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// Path that failed.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A directory entry has a non-UTF-8 name.
    #[error("non-UTF-8 path under {0}")]
    NonUtf8Path(Utf8PathBuf),
}

impl ConfigBundle {
    /// Builds a bundle by walking `root`.
    ///
    /// Missing optional pieces (either name list, either directory, the
    /// path file) are simply left empty.
    ///
    /// # Errors
    ///
    /// Returns [`BundleError`] when a present file or directory cannot be
    /// read.
    pub fn from_dir(root: &Utf8Path) -> Result<Self, BundleError> {
        Ok(Self {
            imaps: read_name_list(&root.join("data").join("imap_names.txt"))?,
            replicated_maps: read_name_list(&root.join("data").join("replicated_map_names.txt"))?,
            source: walk_dir(&root.join("source"))?,
            target: walk_dir(&root.join("target"))?,
            config_path: read_optional(&root.join("data").join("path.txt"))?.unwrap_or_default(),
        })
    }
}

fn walk_dir(root: &Utf8Path) -> Result<Vec<BundleFile>, BundleError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn collect_files(
    root: &Utf8Path,
    dir: &Utf8Path,
    out: &mut Vec<BundleFile>,
) -> Result<(), BundleError> {
    let entries = fs::read_dir(dir).map_err(|source| BundleError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| BundleError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = Utf8PathBuf::from_path_buf(entry.path())
            .map_err(|_| BundleError::NonUtf8Path(dir.to_path_buf()))?;
        let Some(name) = path.file_name() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let bytes = fs::read(&path).map_err(|source| BundleError::Io {
                path: path.clone(),
                source,
            })?;
            let relative = path.strip_prefix(root).unwrap_or(&path);
            out.push(BundleFile {
                name: relative.to_string(),
                content: BASE64.encode(bytes),
            });
        }
    }
    Ok(())
}

fn read_name_list(path: &Utf8Path) -> Result<Vec<String>, BundleError> {
    let Some(raw) = read_optional(path)? else {
        return Ok(Vec::new());
    };
    // A set keeps the names unique; BTreeSet also sorts them.
    let names: BTreeSet<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    Ok(names.into_iter().map(str::to_owned).collect())
}

fn read_optional(path: &Utf8Path) -> Result<Option<String>, BundleError> {
    if !path.is_file() {
        return Ok(None);
    }
    fs::read_to_string(path)
        .map(Some)
        .map_err(|source| BundleError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir")
    }

    #[test]
    fn missing_pieces_yield_empty_bundle() {
        let dir = TempDir::new().expect("tempdir");
        let bundle = ConfigBundle::from_dir(&utf8(&dir)).expect("bundle");
        assert_eq!(bundle, ConfigBundle::default());
    }

    #[test]
    fn walks_source_and_skips_hidden_entries() {
        let dir = TempDir::new().expect("tempdir");
        let root = utf8(&dir);
        fs::create_dir_all(root.join("source").join("nested")).expect("mkdir");
        fs::write(root.join("source").join("cluster.yaml"), b"a: 1").expect("write");
        fs::write(root.join("source").join(".hidden"), b"x").expect("write");
        fs::write(root.join("source").join("nested").join("keys.pem"), b"k").expect("write");

        let bundle = ConfigBundle::from_dir(&root).expect("bundle");
        let names: Vec<&str> = bundle.source.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["cluster.yaml", "nested/keys.pem"]);
        let first = bundle.source.first().expect("first bundled file");
        assert_eq!(first.content, BASE64.encode(b"a: 1"));
    }

    #[test]
    fn name_lists_are_deduplicated_and_sorted() {
        let dir = TempDir::new().expect("tempdir");
        let root = utf8(&dir);
        fs::create_dir_all(root.join("data")).expect("mkdir");
        fs::write(
            root.join("data").join("imap_names.txt"),
            "orders\n\n customers \norders\n",
        )
        .expect("write");

        let bundle = ConfigBundle::from_dir(&root).expect("bundle");
        assert_eq!(bundle.imaps, vec!["customers", "orders"]);
    }
}
