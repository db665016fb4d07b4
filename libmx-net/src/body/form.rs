use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

/// Text fields in arrival order. Names keep their `a[b][]` sub-index syntax.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    fields: Vec<(String, String)>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: String, value: String) {
        self.fields.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Values whose name is `base` followed by `[..]` segments, with the parsed segments.
    ///
    /// `user[address][city]=x` yields `(["address", "city"], "x")` for base `user`.
    pub fn indexed(&self, base: &str) -> Vec<(Vec<String>, &str)> {
        self.fields
            .iter()
            .filter_map(|(name, value)| {
                let rest = name.strip_prefix(base)?;
                let path = parse_subindexes(rest)?;
                Some((path, value.as_str()))
            })
            .collect()
    }
}

fn parse_subindexes(mut rest: &str) -> Option<Vec<String>> {
    let mut path = Vec::new();
    while !rest.is_empty() {
        let inner = rest.strip_prefix('[')?;
        let end = inner.find(']')?;
        path.push(inner[..end].to_string());
        rest = &inner[end + 1..];
    }
    Some(path)
}

/// Uploaded file held in a temporary file that is deleted on drop unless kept.
#[derive(Debug)]
pub struct TempUpload {
    file: NamedTempFile,
}

impl TempUpload {
    pub(crate) fn new(file: NamedTempFile) -> Self {
        Self { file }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Independent read handle positioned at the start of the file.
    pub fn reopen(&self) -> io::Result<File> {
        self.file.reopen()
    }

    /// Keeps the file on disk and returns its path.
    pub fn into_kept(self) -> io::Result<PathBuf> {
        self.file
            .into_temp_path()
            .keep()
            .map_err(|err| err.error)
    }

    /// Moves the file to `path`.
    pub fn persist_to(self, path: &Path) -> io::Result<File> {
        self.file.persist(path).map_err(|err| err.error)
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Debug)]
pub struct FileField {
    pub name: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub file: TempUpload,
}
