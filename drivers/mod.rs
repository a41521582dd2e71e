// Driver package / 驱动包
pub mod memory;
pub mod webdav;
