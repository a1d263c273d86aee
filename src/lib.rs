//! FlashBoot - ESP32-S3 存储引导库
//!
//! 设备上电后、任何应用逻辑运行之前的存储初始化:
//! - 挂载板载 Flash 上的日志结构文件系统, 首次启动时自动格式化
//! - 可选挂载 SD 卡上的 FAT 文件系统 (失败不影响启动)
//! - 维护挂载表、工作目录与模块搜索路径 (引导上下文)

#![no_std]

pub mod boot;
pub mod fs;
pub mod util;
pub mod vfs;

// ===== 重导出常用类型 =====
pub use boot::{BootContext, BootError, BootReport, PrimaryOutcome, RemovableStatus};
pub use fs::{FileSystem, FlashStorage, SdCard, SdmmcHost};
pub use vfs::{FsKind, MountTable};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 引导配置常量
pub mod config {
    /// Flash 最小编程粒度 (字节), 挂载与格式化必须使用同一值
    pub const FLASH_PROG_SIZE: u32 = 256;

    /// 主文件系统挂载点
    pub const FLASH_MOUNT_POINT: &str = "/flash";

    /// SD 卡挂载点
    pub const SDCARD_MOUNT_POINT: &str = "/sdcard";

    /// 哨兵文件名: 存在时跳过 SD 卡挂载 (内容无关, 只检查存在性)
    pub const SKIP_SD_MARKER: &str = "SKIPSD";

    /// 默认 SD 卡插槽号
    pub const SDCARD_SLOT: u8 = 1;

    /// 挂载点路径最大长度
    pub const MOUNT_PATH_LEN: usize = 16;

    /// 模块搜索路径最大条目数
    pub const SEARCH_PATH_DEPTH: usize = 8;
}
