//! A host directory standing in for the device's SD card.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use wbgt_core::storage::StorageMedium;

pub struct DirectoryMedium {
    root: PathBuf,
}

impl DirectoryMedium {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Map a medium name to a path below the root. Anything that could
    /// leave the root is refused.
    fn resolve(&self, name: &str) -> io::Result<PathBuf> {
        let relative = Path::new(name);
        if name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing medium path {name:?}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl StorageMedium for DirectoryMedium {
    type Error = io::Error;

    fn read(&mut self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.resolve(name)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)
    }

    fn remove(&mut self, name: &str) -> io::Result<()> {
        match fs::remove_file(self.resolve(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
