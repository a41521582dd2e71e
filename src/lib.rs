pub mod storage;
pub mod utils;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use drivers::memory::MemoryStore;
pub use drivers::webdav::{from_parameters, WebDavConfig, WebDavDriver, WriteMode, WriterOptions};
pub use storage::{FileInfo, FileWriter, StorageDriver, StorageError, WalkControl, WalkOptions};
