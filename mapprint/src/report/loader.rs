//! Artifact retrieval by locator.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use super::ReportError;

/// Streams a stored report to a writer.
pub trait ReportLoader: Send + Sync {
    /// Returns true if this loader understands `uri`.
    fn accepts(&self, uri: &str) -> bool;

    /// Copies the report at `uri` into `out`, returning the bytes written.
    fn load_report(&self, uri: &str, out: &mut dyn Write) -> Result<u64, ReportError>;
}

/// Loads `file://` locators, optionally confined to one directory.
#[derive(Debug, Clone, Default)]
pub struct FileReportLoader {
    root: Option<PathBuf>,
}

impl FileReportLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses paths outside `root`.
    pub fn within(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf, ReportError> {
        let raw = uri
            .strip_prefix("file://")
            .ok_or_else(|| ReportError::UnsupportedLocator(uri.to_string()))?;
        let path = match std::fs::canonicalize(raw) {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ReportError::NotFound(uri.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(root) = &self.root {
            let root = std::fs::canonicalize(root)?;
            if !path.starts_with(&root) {
                return Err(ReportError::NotFound(uri.to_string()));
            }
        }
        Ok(path)
    }
}

impl ReportLoader for FileReportLoader {
    fn accepts(&self, uri: &str) -> bool {
        uri.starts_with("file://")
    }

    fn load_report(&self, uri: &str, out: &mut dyn Write) -> Result<u64, ReportError> {
        let path = self.resolve(uri)?;
        let mut file = File::open(path)?;
        Ok(io::copy(&mut file, out)?)
    }
}

/// Ordered set of loaders; the first one accepting a locator wins.
#[derive(Default)]
pub struct ReportLoaders {
    loaders: Vec<Box<dyn ReportLoader>>,
}

impl ReportLoaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loader(mut self, loader: impl ReportLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    pub fn accepts(&self, uri: &str) -> bool {
        self.loaders.iter().any(|l| l.accepts(uri))
    }

    pub fn load_report(&self, uri: &str, out: &mut dyn Write) -> Result<u64, ReportError> {
        self.loaders
            .iter()
            .find(|l| l.accepts(uri))
            .ok_or_else(|| ReportError::UnsupportedLocator(uri.to_string()))?
            .load_report(uri, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::file_locator;

    #[test]
    fn test_file_loader_copies_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, b"report-bytes").unwrap();

        let loaders = ReportLoaders::new().with_loader(FileReportLoader::within(dir.path()));
        let uri = file_locator(&std::fs::canonicalize(&path).unwrap());
        assert!(loaders.accepts(&uri));

        let mut out = Vec::new();
        assert_eq!(loaders.load_report(&uri, &mut out).unwrap(), 12);
        assert_eq!(out, b"report-bytes");
    }

    #[test]
    fn test_unknown_scheme_and_missing_file() {
        let loaders = ReportLoaders::new().with_loader(FileReportLoader::new());
        let mut out = Vec::new();
        assert!(!loaders.accepts("s3://bucket/a.png"));
        assert!(matches!(
            loaders.load_report("s3://bucket/a.png", &mut out),
            Err(ReportError::UnsupportedLocator(_))
        ));
        assert!(matches!(
            loaders.load_report("file:///definitely/not/here.png", &mut out),
            Err(ReportError::NotFound(_))
        ));
    }

    #[test]
    fn test_confined_loader_refuses_outside_paths() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let path = other.path().join("secret.png");
        std::fs::write(&path, b"x").unwrap();

        let loader = FileReportLoader::within(root.path());
        let uri = file_locator(&std::fs::canonicalize(&path).unwrap());
        let mut out = Vec::new();
        assert!(matches!(
            loader.load_report(&uri, &mut out),
            Err(ReportError::NotFound(_))
        ));
        assert!(out.is_empty());
    }
}
