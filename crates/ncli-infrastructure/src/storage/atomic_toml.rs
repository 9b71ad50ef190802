//! Crash-safe TOML files.
//!
//! Writes go to a hidden sibling file that is synced and then renamed over
//! the target, so readers only ever see a complete document. Read-modify-write
//! cycles hold an exclusive `fs2` lock on a `.lock` sibling.

use ncli_core::error::NcliError;
use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum AtomicTomlError {
    Io(std::io::Error),
    Parse { path: PathBuf, source: toml::de::Error },
    Serialize(toml::ser::Error),
    Lock(String),
}

impl std::fmt::Display for AtomicTomlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtomicTomlError::Io(e) => write!(f, "I/O error: {}", e),
            AtomicTomlError::Parse { path, source } => {
                write!(f, "cannot parse {}: {}", path.display(), source)
            }
            AtomicTomlError::Serialize(e) => write!(f, "TOML serialization error: {}", e),
            AtomicTomlError::Lock(e) => write!(f, "Lock error: {}", e),
        }
    }
}

impl std::error::Error for AtomicTomlError {}

impl From<std::io::Error> for AtomicTomlError {
    fn from(e: std::io::Error) -> Self {
        AtomicTomlError::Io(e)
    }
}

impl From<toml::ser::Error> for AtomicTomlError {
    fn from(e: toml::ser::Error) -> Self {
        AtomicTomlError::Serialize(e)
    }
}

impl From<AtomicTomlError> for NcliError {
    fn from(e: AtomicTomlError) -> Self {
        match e {
            AtomicTomlError::Io(e) => NcliError::from(e),
            AtomicTomlError::Parse { path, source } => NcliError::Serialization {
                format: "toml".to_string(),
                message: format!("{}: {}", path.display(), source),
            },
            AtomicTomlError::Serialize(e) => NcliError::from(e),
            AtomicTomlError::Lock(message) => NcliError::io(message),
        }
    }
}

/// Typed handle to one TOML document on disk.
#[derive(Debug, Clone)]
pub struct AtomicTomlFile<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document. A missing or blank file is `Ok(None)`.
    pub fn load(&self) -> Result<Option<T>, AtomicTomlError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }
        toml::from_str(&content)
            .map(Some)
            .map_err(|source| AtomicTomlError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    /// Writes the whole document through a temp file and rename.
    pub fn save(&self, data: &T) -> Result<(), AtomicTomlError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let text = toml::to_string_pretty(data)?;

        let tmp_path = self.temp_path()?;
        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(text.as_bytes())?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Locked read-modify-write. `f` sees `default_value` when the file does
    /// not exist yet; nothing is written if it fails.
    pub fn update<F, R>(&self, default_value: T, f: F) -> Result<R, AtomicTomlError>
    where
        F: FnOnce(&mut T) -> Result<R, AtomicTomlError>,
    {
        let _lock = FileLock::acquire(&self.path)?;
        let mut data = self.load()?.unwrap_or(default_value);
        let out = f(&mut data)?;
        self.save(&data)?;
        Ok(out)
    }

    fn temp_path(&self) -> Result<PathBuf, AtomicTomlError> {
        let file_name = self.path.file_name().ok_or_else(|| {
            AtomicTomlError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no file name",
            ))
        })?;
        let tmp_name = format!(".{}.tmp", file_name.to_string_lossy());
        Ok(self.path.with_file_name(tmp_name))
    }
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn load_or_default(&self) -> Result<T, AtomicTomlError> {
        Ok(self.load()?.unwrap_or_default())
    }
}

/// Exclusive lock on `<file>.lock`, released on drop.
struct FileLock {
    #[allow(dead_code)]
    file: File,
    lock_path: PathBuf,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, AtomicTomlError> {
        let lock_path = path.with_extension("lock");
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        #[cfg(unix)]
        {
            use fs2::FileExt;
            file.lock_exclusive().map_err(|e| {
                AtomicTomlError::Lock(format!("cannot lock {}: {}", lock_path.display(), e))
            })?;
        }

        Ok(FileLock { file, lock_path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}
