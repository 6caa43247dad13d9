mod file_system_port;

pub use file_system_port::{FileEntry, FileSystem};
