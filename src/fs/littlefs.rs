//! LittleFS 主文件系统封装
//!
//! 板载 Flash 上的日志结构文件系统。挂载与格式化都要求调用方传入
//! 编程粒度 (progsize), 且两者必须使用同一值 —— 该值写入超级块,
//! 挂载时不一致按挂载失败处理, 由引导流程走重新格式化路径。
//!
//! 除超级块外维护一张标记文件表 (块 1), 仅支持 `touch` / `remove` /
//! `exists`: 引导流程只需要检查哨兵文件是否存在。

use core::fmt;

use super::storage::{BlockDevice, StorageError};

/// 超级块魔数
const SUPERBLOCK_MAGIC: &[u8; 8] = b"littlefs";

/// 磁盘格式版本
const DISK_VERSION: u32 = 0x0000_0002;

/// 超级块有效载荷长度 (版本 + 块大小 + 魔数 + 编程粒度)
const SUPERBLOCK_LEN: usize = 20;

/// 标记文件表所在块
const MARKER_TABLE_BLOCK: u32 = 1;

/// 文件名最大长度 (标记表条目首字节存放长度)
pub const MAX_NAME_LEN: usize = 31;

/// 支持的最大编程粒度
pub const MAX_PROG_SIZE: u32 = 256;

/// 支持的最小编程粒度 (须容纳超级块与标记表条目头)
pub const MIN_PROG_SIZE: u32 = 32;

/// 文件系统错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FsError {
    /// 存储层错误
    Storage(StorageError),
    /// 文件系统损坏 (魔数或几何参数不符)
    Corrupt,
    /// 文件不存在
    NotFound,
    /// 文件名过长
    NameTooLong,
    /// 空间不足
    NoSpace,
    /// 无效参数
    InvalidParam,
    /// 文件系统未挂载
    NotMounted,
}

impl From<StorageError> for FsError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::Corrupt => write!(f, "Filesystem corrupt"),
            Self::NotFound => write!(f, "Not found"),
            Self::NameTooLong => write!(f, "Name too long"),
            Self::NoSpace => write!(f, "No space"),
            Self::InvalidParam => write!(f, "Invalid parameter"),
            Self::NotMounted => write!(f, "Not mounted"),
        }
    }
}

/// 文件系统配置
#[derive(Debug, Clone, Copy)]
pub struct FsConfig {
    /// 块大小
    pub block_size: u32,
    /// 总块数
    pub block_count: u32,
    /// 编程粒度 (挂载/格式化时确定)
    pub prog_size: u32,
}

/// LittleFS 文件系统
pub struct FileSystem<D: BlockDevice> {
    /// 底层块设备
    device: D,
    /// 文件系统配置
    config: FsConfig,
    /// 是否已挂载
    mounted: bool,
}

impl<D: BlockDevice> FileSystem<D> {
    /// 创建文件系统实例, 几何参数取自设备
    pub fn new(device: D) -> Self {
        let config = FsConfig {
            block_size: device.block_size(),
            block_count: device.block_count(),
            prog_size: 0,
        };

        Self {
            device,
            config,
            mounted: false,
        }
    }

    /// 获取配置
    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// 检查是否已挂载
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// 释放底层设备
    pub fn into_device(self) -> D {
        self.device
    }

    fn check_prog_size(&self, prog_size: u32) -> Result<(), FsError> {
        if !(MIN_PROG_SIZE..=MAX_PROG_SIZE).contains(&prog_size) || !prog_size.is_power_of_two() {
            return Err(FsError::InvalidParam);
        }
        // 编程粒度必须是设备页面大小的整数倍
        if prog_size % self.device.page_size() != 0 {
            return Err(FsError::InvalidParam);
        }
        // 标记表条目按编程粒度对齐, 每块至少容纳一个条目
        if prog_size > self.config.block_size {
            return Err(FsError::InvalidParam);
        }
        Ok(())
    }

    /// 挂载文件系统
    ///
    /// 读取超级块并校验魔数、版本与几何参数。`prog_size` 必须与
    /// 格式化时使用的值一致, 否则按 [`FsError::Corrupt`] 处理。
    pub fn mount(&mut self, prog_size: u32) -> Result<(), FsError> {
        if self.mounted {
            // 重复挂载为空操作, 但编程粒度不一致不能被静默接受
            if prog_size != self.config.prog_size {
                return Err(FsError::InvalidParam);
            }
            return Ok(());
        }

        self.check_prog_size(prog_size)?;

        let mut superblock = [0u8; SUPERBLOCK_LEN];
        self.device.read(0, 0, &mut superblock)?;

        if &superblock[8..16] != SUPERBLOCK_MAGIC {
            return Err(FsError::Corrupt);
        }

        let version = u32::from_le_bytes([superblock[0], superblock[1], superblock[2], superblock[3]]);
        if version != DISK_VERSION {
            return Err(FsError::Corrupt);
        }

        let block_size =
            u32::from_le_bytes([superblock[4], superblock[5], superblock[6], superblock[7]]);
        if block_size != self.config.block_size {
            return Err(FsError::Corrupt);
        }

        let stored_prog =
            u32::from_le_bytes([superblock[16], superblock[17], superblock[18], superblock[19]]);
        if stored_prog != prog_size {
            // 用不同编程粒度格式化过的镜像不可用, 交给格式化路径处理
            return Err(FsError::Corrupt);
        }

        self.config.prog_size = prog_size;
        self.mounted = true;
        Ok(())
    }

    /// 格式化文件系统 (破坏性操作, 清空全部既有内容)
    ///
    /// 擦除超级块与标记文件表, 并以给定编程粒度写入新超级块。
    /// 格式化后文件系统处于未挂载状态, 需要再次 [`mount`](Self::mount)。
    pub fn format(&mut self, prog_size: u32) -> Result<(), FsError> {
        self.check_prog_size(prog_size)?;

        if self.config.block_count <= MARKER_TABLE_BLOCK {
            return Err(FsError::InvalidParam);
        }

        self.mounted = false;

        self.device.erase(0)?;
        self.device.erase(MARKER_TABLE_BLOCK)?;

        let mut page = [0xFFu8; MAX_PROG_SIZE as usize];
        page[0..4].copy_from_slice(&DISK_VERSION.to_le_bytes());
        page[4..8].copy_from_slice(&self.config.block_size.to_le_bytes());
        page[8..16].copy_from_slice(SUPERBLOCK_MAGIC);
        page[16..20].copy_from_slice(&prog_size.to_le_bytes());

        self.device.prog(0, 0, &page[..prog_size as usize])?;
        self.device.sync()?;

        self.config.prog_size = prog_size;
        Ok(())
    }

    // ==================== 标记文件表 ====================
    //
    // 块 1 按编程粒度划分条目: 首字节为文件名长度, 其后为文件名。
    // 0xFF = 空闲 (擦除态), 0x00 = 已删除。

    fn marker_slots(&self) -> u32 {
        self.config.block_size / self.config.prog_size
    }

    fn read_entry_header(&self, slot: u32) -> Result<[u8; 1 + MAX_NAME_LEN], FsError> {
        let mut entry = [0u8; 1 + MAX_NAME_LEN];
        self.device
            .read(MARKER_TABLE_BLOCK, slot * self.config.prog_size, &mut entry)?;
        Ok(entry)
    }

    fn check_name(name: &str) -> Result<(), FsError> {
        if name.is_empty() {
            return Err(FsError::InvalidParam);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(FsError::NameTooLong);
        }
        Ok(())
    }

    /// 定位文件名所在条目槽位
    fn find_slot(&self, name: &str) -> Result<Option<u32>, FsError> {
        for slot in 0..self.marker_slots() {
            let entry = self.read_entry_header(slot)?;
            let len = entry[0] as usize;
            if len == 0xFF || len == 0 || len > MAX_NAME_LEN {
                continue;
            }
            if &entry[1..1 + len] == name.as_bytes() {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }

    /// 检查文件是否存在
    pub fn exists(&self, name: &str) -> Result<bool, FsError> {
        if !self.mounted {
            return Err(FsError::NotMounted);
        }
        Self::check_name(name)?;

        Ok(self.find_slot(name)?.is_some())
    }

    /// 创建文件 (存在时为空操作)
    pub fn touch(&mut self, name: &str) -> Result<(), FsError> {
        if !self.mounted {
            return Err(FsError::NotMounted);
        }
        Self::check_name(name)?;

        if self.find_slot(name)?.is_some() {
            return Ok(());
        }

        // 找第一个空闲槽位
        for slot in 0..self.marker_slots() {
            let entry = self.read_entry_header(slot)?;
            if entry[0] != 0xFF {
                continue;
            }

            let mut page = [0xFFu8; MAX_PROG_SIZE as usize];
            page[0] = name.len() as u8;
            page[1..1 + name.len()].copy_from_slice(name.as_bytes());
            self.device.prog(
                MARKER_TABLE_BLOCK,
                slot * self.config.prog_size,
                &page[..self.config.prog_size as usize],
            )?;
            self.device.sync()?;
            return Ok(());
        }

        Err(FsError::NoSpace)
    }

    /// 删除文件
    ///
    /// 将整个条目清零 (NOR Flash 允许在不擦除的情况下将位拉低)。
    pub fn remove(&mut self, name: &str) -> Result<(), FsError> {
        if !self.mounted {
            return Err(FsError::NotMounted);
        }
        Self::check_name(name)?;

        let slot = self.find_slot(name)?.ok_or(FsError::NotFound)?;

        let zeros = [0u8; MAX_PROG_SIZE as usize];
        self.device.prog(
            MARKER_TABLE_BLOCK,
            slot * self.config.prog_size,
            &zeros[..self.config.prog_size as usize],
        )?;
        self.device.sync()?;
        Ok(())
    }
}

impl<D: BlockDevice> crate::boot::PrimaryVolume for FileSystem<D> {
    fn mount(&mut self, prog_size: u32) -> Result<(), FsError> {
        FileSystem::mount(self, prog_size)
    }

    fn format(&mut self, prog_size: u32) -> Result<(), FsError> {
        FileSystem::format(self, prog_size)
    }

    fn exists(&self, name: &str) -> Result<bool, FsError> {
        FileSystem::exists(self, name)
    }
}
