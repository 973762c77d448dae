//! File operations whose failure the disk backend must survive
//!
//! Deletions and renames are routed through [`FileOps`] so the recovery
//! protocol can be driven deterministically: an implementation may refuse
//! to touch a path the way an OS does while another process holds it open.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Physical delete/rename primitives used by the disk backend
pub trait FileOps: Send + Sync + fmt::Debug {
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`FileOps`] backed directly by `std::fs`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileOps;

impl FileOps for StdFileOps {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}
