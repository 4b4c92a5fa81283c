//! Shared test backends

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::backend::{Backend, File, Lstater, MemFs, Metadata, SharedBackend};
use crate::error::{Error, Result};

/// Memory backend holding `mydir/f1-<id>.txt` and `mydir/f2-<id>.txt`,
/// whose contents are `f1-<content>` and `f2-<content>`.
pub(crate) fn basic_fs(id_filename: &str, id_content: &str) -> SharedBackend {
    let fs = MemFs::new();
    for prefix in ["f1", "f2"] {
        fs.write_file(
            format!("mydir/{}-{}.txt", prefix, id_filename),
            format!("{}-{}", prefix, id_content),
        )
        .unwrap();
    }
    Arc::new(fs)
}

/// Memory backend built from `(path, content)` pairs
pub(crate) fn mem_fs(files: &[(&str, &str)]) -> Arc<MemFs> {
    let fs = MemFs::new();
    for (path, content) in files {
        fs.write_file(path, content).unwrap();
    }
    Arc::new(fs)
}

pub(crate) fn read_file(fs: &dyn Backend, path: &str) -> String {
    let mut f = fs.open(Path::new(path)).unwrap();
    let mut content = String::new();
    f.read_to_string(&mut content).unwrap();
    f.close().unwrap();
    content
}

pub(crate) fn read_dir_names(fs: &dyn Backend, path: &str) -> Vec<String> {
    let mut dir = fs.open(Path::new(path)).unwrap();
    let names = dir.read_dir_names(0).unwrap();
    dir.close().unwrap();
    names
}

/// Backend whose lookups all fail with a non "not found" error
pub(crate) struct FailingFs {
    message: String,
}

impl FailingFs {
    pub(crate) fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    fn fail<T>(&self) -> Result<T> {
        Err(Error::Backend(self.message.clone()))
    }
}

impl Backend for FailingFs {
    fn name(&self) -> &str {
        "failingfs"
    }

    fn stat(&self, _path: &Path) -> Result<Metadata> {
        self.fail()
    }

    fn open(&self, _path: &Path) -> Result<Box<dyn File>> {
        unimplemented!()
    }

    fn open_file(&self, _path: &Path, _flags: i32, _perm: u32) -> Result<Box<dyn File>> {
        unimplemented!()
    }

    fn create(&self, _path: &Path) -> Result<Box<dyn File>> {
        unimplemented!()
    }

    fn mkdir(&self, _path: &Path, _perm: u32) -> Result<()> {
        unimplemented!()
    }

    fn mkdir_all(&self, _path: &Path, _perm: u32) -> Result<()> {
        unimplemented!()
    }

    fn remove(&self, _path: &Path) -> Result<()> {
        unimplemented!()
    }

    fn remove_all(&self, _path: &Path) -> Result<()> {
        unimplemented!()
    }

    fn rename(&self, _from: &Path, _to: &Path) -> Result<()> {
        unimplemented!()
    }

    fn chmod(&self, _path: &Path, _mode: u32) -> Result<()> {
        unimplemented!()
    }

    fn chown(&self, _path: &Path, _uid: u32, _gid: u32) -> Result<()> {
        unimplemented!()
    }

    fn chtimes(&self, _path: &Path, _atime: SystemTime, _mtime: SystemTime) -> Result<()> {
        unimplemented!()
    }

    fn as_lstater(&self) -> Option<&dyn Lstater> {
        Some(self)
    }
}

impl Lstater for FailingFs {
    fn lstat_if_possible(&self, _path: &Path) -> Result<(Metadata, bool)> {
        self.fail()
    }
}
