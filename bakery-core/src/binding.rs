//! What a tag is bound to on disk.

use camino::{Utf8Path, Utf8PathBuf};
use std::slice;

/// The path (or, for a fileset tag, the paths) a tag is bound to.
///
/// Conversions exist for the usual path types, so bindings can be written as
/// `("x", "in.txt")` or `("fileset::pages", vec!["a.txt", "b.txt"])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathBinding {
    File(Utf8PathBuf),
    Set(Vec<Utf8PathBuf>),
}

impl PathBinding {
    /// Every bound path, in member order.
    pub fn paths(&self) -> &[Utf8PathBuf] {
        match self {
            PathBinding::File(path) => slice::from_ref(path),
            PathBinding::Set(paths) => paths,
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, PathBinding::Set(_))
    }
}

impl From<Utf8PathBuf> for PathBinding {
    fn from(path: Utf8PathBuf) -> Self {
        PathBinding::File(path)
    }
}

impl From<&Utf8PathBuf> for PathBinding {
    fn from(path: &Utf8PathBuf) -> Self {
        PathBinding::File(path.clone())
    }
}

impl From<&Utf8Path> for PathBinding {
    fn from(path: &Utf8Path) -> Self {
        PathBinding::File(path.to_path_buf())
    }
}

impl From<String> for PathBinding {
    fn from(path: String) -> Self {
        PathBinding::File(path.into())
    }
}

impl From<&str> for PathBinding {
    fn from(path: &str) -> Self {
        PathBinding::File(path.into())
    }
}

impl<T: Into<Utf8PathBuf>> From<Vec<T>> for PathBinding {
    fn from(paths: Vec<T>) -> Self {
        PathBinding::Set(paths.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Utf8PathBuf>, const N: usize> From<[T; N]> for PathBinding {
    fn from(paths: [T; N]) -> Self {
        PathBinding::Set(paths.into_iter().map(Into::into).collect())
    }
}
