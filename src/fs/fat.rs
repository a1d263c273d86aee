//! FAT 文件系统封装
//!
//! 可移动存储 (SD 卡) 上的 FAT 卷。挂载时读取启动扇区, 校验
//! 0x55AA 签名并解析 BIOS 参数块 (BPB) 的几何字段; 任何失败都
//! 由引导流程按非致命错误处理。

use core::fmt;

use super::storage::{BlockDevice, StorageError};

/// 启动扇区大小
pub const BOOT_SECTOR_SIZE: usize = 512;

/// 启动扇区签名 (偏移 510 处, 小端 0x55 0xAA)
pub const BOOT_SECTOR_SIGNATURE: u16 = 0xAA55;

/// FAT 文件系统错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FatError {
    /// 存储层错误
    Storage(StorageError),
    /// 启动扇区签名错误 (卡未格式化或非 FAT 卷)
    BadSignature,
    /// BPB 几何参数非法
    BadGeometry,
    /// 未挂载
    NotMounted,
}

impl From<StorageError> for FatError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for FatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::BadSignature => write!(f, "Bad boot sector signature"),
            Self::BadGeometry => write!(f, "Bad BPB geometry"),
            Self::NotMounted => write!(f, "Not mounted"),
        }
    }
}

/// BIOS 参数块 (启动扇区关键字段)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bpb {
    /// 每扇区字节数
    pub bytes_per_sector: u16,
    /// 每簇扇区数
    pub sectors_per_cluster: u8,
    /// 保留扇区数 (第一个 FAT 之前, 含引导扇区)
    pub reserved_sectors: u16,
    /// FAT 表数量
    pub fat_count: u8,
    /// 根目录项数 (FAT32 为 0)
    pub root_entries: u16,
    /// 总扇区数
    pub total_sectors: u32,
    /// 每 FAT 扇区数
    pub sectors_per_fat: u32,
    /// 根目录簇号 (仅 FAT32, 一般为 2)
    pub root_cluster: u32,
}

impl Bpb {
    /// 从启动扇区解析 BPB
    pub fn parse(sector: &[u8; BOOT_SECTOR_SIZE]) -> Result<Self, FatError> {
        let signature = u16::from_le_bytes([sector[510], sector[511]]);
        if signature != BOOT_SECTOR_SIGNATURE {
            return Err(FatError::BadSignature);
        }

        let bytes_per_sector = u16::from_le_bytes([sector[11], sector[12]]);
        let sectors_per_cluster = sector[13];
        let reserved_sectors = u16::from_le_bytes([sector[14], sector[15]]);
        let fat_count = sector[16];
        let root_entries = u16::from_le_bytes([sector[17], sector[18]]);

        // 小扇区数为 0 时使用 32 bit 大扇区数 (FAT32 总是如此)
        let small_sectors = u16::from_le_bytes([sector[19], sector[20]]);
        let large_sectors =
            u32::from_le_bytes([sector[32], sector[33], sector[34], sector[35]]);
        let total_sectors = if small_sectors != 0 {
            small_sectors as u32
        } else {
            large_sectors
        };

        // 每 FAT 扇区数: FAT12/16 在偏移 22, FAT32 在偏移 36
        let sectors_per_fat16 = u16::from_le_bytes([sector[22], sector[23]]);
        let sectors_per_fat = if sectors_per_fat16 != 0 {
            sectors_per_fat16 as u32
        } else {
            u32::from_le_bytes([sector[36], sector[37], sector[38], sector[39]])
        };

        let root_cluster = u32::from_le_bytes([sector[44], sector[45], sector[46], sector[47]]);

        let bpb = Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            root_entries,
            total_sectors,
            sectors_per_fat,
            root_cluster,
        };
        bpb.validate()?;
        Ok(bpb)
    }

    fn validate(&self) -> Result<(), FatError> {
        if !matches!(self.bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(FatError::BadGeometry);
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(FatError::BadGeometry);
        }
        if self.fat_count == 0 || self.reserved_sectors == 0 {
            return Err(FatError::BadGeometry);
        }
        if self.total_sectors == 0 || self.sectors_per_fat == 0 {
            return Err(FatError::BadGeometry);
        }
        Ok(())
    }

    /// 是否为 FAT32 卷
    pub fn is_fat32(&self) -> bool {
        self.root_entries == 0
    }

    /// 数据区起始扇区号
    pub fn data_start_sector(&self) -> u32 {
        self.reserved_sectors as u32 + self.fat_count as u32 * self.sectors_per_fat
    }
}

/// FAT 文件系统
pub struct FatFileSystem<D: BlockDevice> {
    /// 底层块设备 (SD 卡)
    device: D,
    /// 挂载后解析出的 BPB
    bpb: Option<Bpb>,
}

impl<D: BlockDevice> FatFileSystem<D> {
    /// 创建文件系统实例 (未挂载)
    pub fn new(device: D) -> Self {
        Self { device, bpb: None }
    }

    /// 挂载文件系统: 读取并校验启动扇区
    pub fn mount(&mut self) -> Result<(), FatError> {
        if self.bpb.is_some() {
            return Ok(());
        }

        let mut sector = [0u8; BOOT_SECTOR_SIZE];
        self.device.read(0, 0, &mut sector)?;

        self.bpb = Some(Bpb::parse(&sector)?);
        Ok(())
    }

    /// 检查是否已挂载
    pub fn is_mounted(&self) -> bool {
        self.bpb.is_some()
    }

    /// 已挂载卷的 BPB
    pub fn bpb(&self) -> Result<&Bpb, FatError> {
        self.bpb.as_ref().ok_or(FatError::NotMounted)
    }

    /// 释放底层设备
    pub fn into_device(self) -> D {
        self.device
    }
}

impl<D: BlockDevice> crate::boot::RemovableVolume for FatFileSystem<D> {
    type Error = FatError;

    fn mount(&mut self) -> Result<(), FatError> {
        FatFileSystem::mount(self)
    }
}
