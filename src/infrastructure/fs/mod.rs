//! Filesystem adapters.

pub mod memory_fs;
pub mod os_fs;

pub use memory_fs::MemoryFileSystem;
pub use os_fs::OsFileSystem;
