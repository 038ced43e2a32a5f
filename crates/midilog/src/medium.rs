//! Storage seam between the session manager and the removable medium
//!
//! The session manager only ever needs four things from storage: probe a
//! name, open it for appending, make buffered writes durable, and remove it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// An append-only stream with an explicit durability point
pub trait LogStream: Write + Send {
    /// Push buffered bytes to the medium and wait until they are durable
    fn commit(&mut self) -> io::Result<()>;
}

/// Where session logs live
pub trait LogMedium: Send {
    fn exists(&self, name: &str) -> io::Result<bool>;

    /// Open `name` for appending, creating it if needed
    fn open_append(&self, name: &str) -> io::Result<Box<dyn LogStream>>;

    fn remove(&self, name: &str) -> io::Result<()>;
}

/// Session logs as files in one directory (the card's mount point)
#[derive(Debug, Clone)]
pub struct DirMedium {
    root: PathBuf,
}

impl DirMedium {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl LogMedium for DirMedium {
    fn exists(&self, name: &str) -> io::Result<bool> {
        // Fails when the medium itself is missing, unlike Path::exists
        fs::metadata(&self.root)?;
        match fs::symlink_metadata(self.path_of(name)) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn open_append(&self, name: &str) -> io::Result<Box<dyn LogStream>> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path_of(name))?;
        Ok(Box::new(FileStream {
            writer: BufWriter::new(file),
        }))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.path_of(name))
    }
}

/// Buffered file stream; `commit` flushes and syncs data blocks
struct FileStream {
    writer: BufWriter<File>,
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl LogStream for FileStream {
    fn commit(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}
