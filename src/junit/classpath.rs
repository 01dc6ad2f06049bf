//! Class byte sources: how classes are located for discovery and validation.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, trace};

use super::classfile::{ClassFileError, ClassInfo};

/// Default number of classes a [`CachingByteSource`] keeps.
pub const DEFAULT_CACHE_SIZE: usize = 200;

/// Resolves a dotted class name to its class-file bytes.
pub trait ClassByteSource: Send + Sync {
    fn class_bytes(&self, class_name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Relative path of a class inside a classpath root.
pub fn class_file_path(class_name: &str) -> PathBuf {
    PathBuf::from(format!("{}.class", class_name.replace('.', "/")))
}

/// Directory entries of a classpath, searched in order.
#[derive(Debug, Clone, Default)]
pub struct DirectoryClassSource {
    roots: Vec<PathBuf>,
}

impl DirectoryClassSource {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots
            .into_iter()
            .filter(|root| {
                let usable = root.is_dir();
                if !usable {
                    debug!(root = %root.display(), "Skipping non-directory classpath entry");
                }
                usable
            })
            .collect();
        Self { roots }
    }

    /// Build from a platform classpath string.
    pub fn from_classpath(classpath: &str) -> Self {
        Self::new(std::env::split_paths(classpath).collect())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

impl ClassByteSource for DirectoryClassSource {
    fn class_bytes(&self, class_name: &str) -> io::Result<Option<Vec<u8>>> {
        let relative = class_file_path(class_name);
        for root in &self.roots {
            let candidate = root.join(&relative);
            if candidate.is_file() {
                return fs::read(candidate).map(Some);
            }
        }
        Ok(None)
    }
}

/// Bounded least-recently-used cache in front of another source.
pub struct CachingByteSource<S> {
    inner: S,
    cache: Mutex<LruCache<String, Option<Arc<Vec<u8>>>>>,
}

impl<S: ClassByteSource> CachingByteSource<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl<S: ClassByteSource> ClassByteSource for CachingByteSource<S> {
    fn class_bytes(&self, class_name: &str) -> io::Result<Option<Vec<u8>>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(class_name) {
                trace!(class_name, "Class bytes cache hit");
                return Ok(hit.as_ref().map(|bytes| bytes.to_vec()));
            }
        }
        let bytes = self.inner.class_bytes(class_name)?.map(Arc::new);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(class_name.to_string(), bytes.clone());
        }
        Ok(bytes.map(Arc::unwrap_or_clone))
    }
}

/// Patched classes win by class name; everything else falls through.
pub struct SelectiveClassSource<S> {
    patched: HashMap<String, PathBuf>,
    fallback: S,
}

impl<S: ClassByteSource> SelectiveClassSource<S> {
    /// Index `patched_files` by the class name recorded inside each file.
    pub fn new(patched_files: &[PathBuf], fallback: S) -> Result<Self, ClassFileError> {
        let mut patched = HashMap::with_capacity(patched_files.len());
        for file in patched_files {
            let info = ClassInfo::read(file)?;
            patched.insert(info.name, file.clone());
        }
        Ok(Self { patched, fallback })
    }

    pub fn is_patched(&self, class_name: &str) -> bool {
        self.patched.contains_key(class_name)
    }

    pub fn patched_classes(&self) -> impl Iterator<Item = &str> {
        self.patched.keys().map(String::as_str)
    }

    /// Copy every patched class into `dir` using the package layout, so
    /// `dir` can be put in front of the classpath.
    pub fn materialize(&self, dir: &Path) -> io::Result<()> {
        for (class_name, file) in &self.patched {
            let target = dir.join(class_file_path(class_name));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(file, &target)?;
            debug!(class_name, target = %target.display(), "Materialized patched class");
        }
        Ok(())
    }
}

impl<S: ClassByteSource> ClassByteSource for SelectiveClassSource<S> {
    fn class_bytes(&self, class_name: &str) -> io::Result<Option<Vec<u8>>> {
        match self.patched.get(class_name) {
            Some(file) => fs::read(file).map(Some),
            None => self.fallback.class_bytes(class_name),
        }
    }
}

/// Join classpath entries with the platform separator.
pub fn join_classpath<I, P>(entries: I) -> io::Result<OsString>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let entries: Vec<PathBuf> = entries.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
    std::env::join_paths(entries).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}
