mod fs;
mod storage;

pub use fs::{FilesystemStorage, SpoolFile};
pub use storage::{InMemoryStorage, Storage, StorageError};
