//! Where section files live.
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Named random access files. Keys are flat file stems.
pub trait SectionStorage {
    type File: Read + Write + Seek;

    /// Creates or truncates `key`.
    fn create(&self, key: &str) -> io::Result<Self::File>;

    /// `None` if `key` does not exist.
    fn open(&self, key: &str) -> io::Result<Option<Self::File>>;

    /// Whether anything was removed.
    fn remove(&self, key: &str) -> io::Result<bool>;
}

/// Section files under `<dir>/sections/<key>.bin`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().join("sections"),
        }
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.bin"))
    }
}

impl SectionStorage for FsStorage {
    type File = File;

    fn create(&self, key: &str) -> io::Result<File> {
        fs::create_dir_all(&self.dir)?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.path(key))
    }

    fn open(&self, key: &str) -> io::Result<Option<File>> {
        match OpenOptions::new().read(true).write(true).open(self.path(key)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self, key: &str) -> io::Result<bool> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

type Files = Rc<RefCell<BTreeMap<String, Vec<u8>>>>;

/// In-memory storage. Clones share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemStorage {
    files: Files,
    fail_after: Rc<RefCell<Option<usize>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes start failing once `bytes` more bytes have been accepted.
    pub fn fail_after_bytes(&self, bytes: usize) {
        *self.fail_after.borrow_mut() = Some(bytes);
    }

    pub fn stop_failing(&self) {
        *self.fail_after.borrow_mut() = None;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files.borrow().contains_key(key)
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(key).cloned()
    }

    pub fn set_bytes(&self, key: &str, bytes: Vec<u8>) {
        self.files.borrow_mut().insert(key.into(), bytes);
    }
}

/// A file of a [`MemStorage`]. Writes land in the shared map as they happen.
#[derive(Debug)]
pub struct MemFile {
    key: String,
    files: Files,
    fail_after: Rc<RefCell<Option<usize>>>,
    position: u64,
}

impl MemFile {
    fn with_contents<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> io::Result<R> {
        let mut files = self.files.borrow_mut();
        let contents = files
            .get_mut(&self.key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file was removed"))?;
        Ok(f(contents))
    }
}

impl Read for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let position = self.position;
        let n = self.with_contents(|contents| {
            let mut cursor = Cursor::new(contents.as_slice());
            cursor.set_position(position);
            cursor.read(buf)
        })??;
        self.position += n as u64;
        Ok(n)
    }
}

impl Write for MemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let accepted = {
            let mut fail_after = self.fail_after.borrow_mut();
            match fail_after.as_mut() {
                Some(0) => return Err(io::Error::other("injected write failure")),
                Some(remaining) => {
                    let n = buf.len().min(*remaining);
                    *remaining -= n;
                    n
                }
                None => buf.len(),
            }
        };
        let position = self.position;
        let n = self.with_contents(|contents| {
            let mut cursor = Cursor::new(contents);
            cursor.set_position(position);
            cursor.write(&buf[..accepted])
        })??;
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for MemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.with_contents(|contents| contents.len() as u64)?;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        self.position = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;
        Ok(self.position)
    }
}

impl SectionStorage for MemStorage {
    type File = MemFile;

    fn create(&self, key: &str) -> io::Result<MemFile> {
        self.files.borrow_mut().insert(key.into(), Vec::new());
        Ok(MemFile {
            key: key.into(),
            files: self.files.clone(),
            fail_after: self.fail_after.clone(),
            position: 0,
        })
    }

    fn open(&self, key: &str) -> io::Result<Option<MemFile>> {
        if !self.contains(key) {
            return Ok(None);
        }
        Ok(Some(MemFile {
            key: key.into(),
            files: self.files.clone(),
            fail_after: self.fail_after.clone(),
            position: 0,
        }))
    }

    fn remove(&self, key: &str) -> io::Result<bool> {
        Ok(self.files.borrow_mut().remove(key).is_some())
    }
}
