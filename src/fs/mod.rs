//! 文件系统与存储设备
//!
//! - `storage`: 块设备抽象与板载 Flash / 内存盘实现
//! - `littlefs`: 板载 Flash 上的主文件系统
//! - `sdcard`: SD 卡驱动 (CSD 解码与几何信息)
//! - `fat`: SD 卡上的 FAT 文件系统 (BPB 解析)

pub mod fat;
pub mod littlefs;
pub mod sdcard;
pub mod storage;

pub use fat::{Bpb, FatError, FatFileSystem};
pub use littlefs::{FileSystem, FsConfig, FsError};
pub use sdcard::{CardGeometry, Csd, SdCard, SdCardError, SdmmcHost};
pub use storage::{BlockDevice, FlashConfig, FlashStorage, RamDisk, StorageError};
