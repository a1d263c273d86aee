//! SD 卡驱动
//!
//! SDMMC 插槽上的可移动存储。[`SdCard::open`] 按插槽号探测并初始化
//! 卡片, 未检测到卡时返回 `None` —— 引导流程据此静默跳过可移动存储。
//!
//! 容量信息来自 CSD 寄存器 (128 bit), 支持 CSD 1.0 (标准容量)、
//! 2.0 (高容量) 与 3.0 (超高容量) 的换算。

use core::fmt;

use super::storage::{BlockDevice, StorageError};

/// SD 卡默认块大小 (字节)
pub const SDCARD_DEFAULT_BLOCK_SIZE: u32 = 512;

/// SD 卡错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum SdCardError {
    /// 未检测到卡
    NoCard,
    /// 初始化时序失败
    InitFailed,
    /// 不支持的 CSD 版本
    UnsupportedCsd,
    /// 读取失败
    ReadError,
    /// 写入失败
    WriteError,
}

impl fmt::Display for SdCardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCard => write!(f, "No card detected"),
            Self::InitFailed => write!(f, "Card initialization failed"),
            Self::UnsupportedCsd => write!(f, "Unsupported CSD structure"),
            Self::ReadError => write!(f, "Card read error"),
            Self::WriteError => write!(f, "Card write error"),
        }
    }
}

/// 卡片几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardGeometry {
    /// 块大小 (字节)
    pub block_len: u32,
    /// 块数
    pub block_count: u32,
}

impl CardGeometry {
    /// 容量 (字节)
    pub fn capacity_bytes(&self) -> u64 {
        self.block_len as u64 * self.block_count as u64
    }
}

/// CSD 寄存器原始值, data[3] 为最高 32 bit
#[derive(Debug, Clone, Copy)]
pub struct Csd {
    pub data: [u32; 4],
}

impl Csd {
    /// CSD_STRUCTURE 字段 (bit 127:126)
    pub fn structure(&self) -> u8 {
        (0x3 & (self.data[3] >> 30)) as u8
    }

    /// 换算卡片几何参数
    pub fn decode(&self) -> Result<CardGeometry, SdCardError> {
        match self.structure() {
            // CSD 1.0: 容量 = (C_SIZE+1) * 2^(C_SIZE_MULT+2) * 2^READ_BL_LEN
            0 => {
                let read_bl_len = 0xF & (self.data[2] >> 16);
                let c_size = ((0x3FF & self.data[2]) << 2) | (0x3 & (self.data[1] >> 30));
                let c_size_mult = 0x7 & (self.data[1] >> 15);

                let block_len = 1u32 << read_bl_len;
                let block_count = (c_size + 1) << (c_size_mult + 2);

                // 统一归一化到 512 字节块
                if block_len != SDCARD_DEFAULT_BLOCK_SIZE {
                    let bytes = block_count as u64 * block_len as u64;
                    Ok(CardGeometry {
                        block_len: SDCARD_DEFAULT_BLOCK_SIZE,
                        block_count: (bytes / SDCARD_DEFAULT_BLOCK_SIZE as u64) as u32,
                    })
                } else {
                    Ok(CardGeometry {
                        block_len,
                        block_count,
                    })
                }
            }
            // CSD 2.0: 容量 = (C_SIZE+1) * 512KB
            1 => {
                let c_size = ((0x3F & self.data[2]) << 16) | (0xFFFF & (self.data[1] >> 16));
                Ok(CardGeometry {
                    block_len: SDCARD_DEFAULT_BLOCK_SIZE,
                    block_count: ((c_size as u64 + 1) * 1024) as u32,
                })
            }
            // CSD 3.0: C_SIZE 扩展到 28 bit
            2 => {
                let c_size = ((0xFF & self.data[2]) << 16) | (0xFFFF & (self.data[1] >> 16));
                Ok(CardGeometry {
                    block_len: SDCARD_DEFAULT_BLOCK_SIZE,
                    block_count: ((c_size as u64 + 1) * 1024) as u32,
                })
            }
            _ => Err(SdCardError::UnsupportedCsd),
        }
    }
}

/// SD 卡句柄
///
/// 初始化时序: GO_IDLE_STATE → SEND_IF_COND → ACMD41 → ALL_SEND_CID →
/// SET_REL_ADD → SEND_CSD → SELECT_CARD → SET_BLOCKLEN。
pub struct SdCard {
    /// 插槽号
    slot: u8,
    /// 相对卡地址 (SET_REL_ADD 响应)
    rca: u16,
    /// 块大小
    block_len: u32,
    /// 块数
    block_count: u32,
    /// 是否完成初始化
    initialized: bool,
}

impl SdCard {
    /// 打开指定插槽的 SD 卡
    ///
    /// 未检测到卡或初始化失败时返回 `None`。
    pub fn open(slot: u8) -> Option<Self> {
        let mut card = Self {
            slot,
            rca: 0,
            block_len: SDCARD_DEFAULT_BLOCK_SIZE,
            block_count: 0,
            initialized: false,
        };

        card.init().ok()?;
        Some(card)
    }

    /// 执行上电初始化时序
    ///
    /// # 实现说明
    /// SDMMC 主机控制器传输是硬件相关操作; esp-hal 1.0 尚未提供
    /// SD/MMC 主机驱动, 当前以未检测到卡收场。接入主机驱动后,
    /// 此处依次发送初始化命令并用 [`Csd::decode`] 填充几何参数。
    fn init(&mut self) -> Result<(), SdCardError> {
        Err(SdCardError::NoCard)
    }

    /// 用 CSD 寄存器内容更新几何参数
    pub fn apply_csd(&mut self, csd: &Csd) -> Result<(), SdCardError> {
        let geometry = csd.decode()?;
        self.block_len = geometry.block_len;
        self.block_count = geometry.block_count;
        Ok(())
    }

    /// 插槽号
    pub fn slot(&self) -> u8 {
        self.slot
    }

    /// 相对卡地址
    pub fn rca(&self) -> u16 {
        self.rca
    }

    /// 卡片几何参数
    pub fn geometry(&self) -> CardGeometry {
        CardGeometry {
            block_len: self.block_len,
            block_count: self.block_count,
        }
    }
}

impl BlockDevice for SdCard {
    fn read(&self, block: u32, _offset: u32, _buffer: &mut [u8]) -> Result<(), StorageError> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        if block >= self.block_count {
            return Err(StorageError::OutOfBounds);
        }

        // READ_SINGLE_BLOCK / READ_MULTIPLE_BLOCK 经主机控制器 DMA 传输
        Err(StorageError::ReadError)
    }

    fn prog(&mut self, block: u32, _offset: u32, _data: &[u8]) -> Result<(), StorageError> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        if block >= self.block_count {
            return Err(StorageError::OutOfBounds);
        }

        Err(StorageError::WriteError)
    }

    fn erase(&mut self, _block: u32) -> Result<(), StorageError> {
        // SD 卡写入无需显式擦除
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn block_size(&self) -> u32 {
        self.block_len
    }

    fn page_size(&self) -> u32 {
        1
    }
}

/// SDMMC 主机封装
///
/// 引导流程通过它按插槽号打开卡片, 并用 FAT 卷包装。
pub struct SdmmcHost;

impl SdmmcHost {
    pub const fn new() -> Self {
        Self
    }
}

impl Default for SdmmcHost {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::boot::RemovableSlot for SdmmcHost {
    type Volume = super::fat::FatFileSystem<SdCard>;

    fn open(&mut self, slot: u8) -> Option<Self::Volume> {
        SdCard::open(slot).map(super::fat::FatFileSystem::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csd_v2_capacity() {
        // CSD 2.0, C_SIZE = 0x3B37 (约 7.4GB 卡)
        let csd = Csd {
            data: [0x0A4040AF, 0x3B377F80, 0x5B590000, 0x400E0032],
        };
        assert_eq!(csd.structure(), 1);

        let geometry = csd.decode().unwrap();
        assert_eq!(geometry.block_len, 512);
        assert_eq!(geometry.block_count, (0x3B37 + 1) * 1024);
    }

    #[test]
    fn test_csd_v1_capacity() {
        // CSD 1.0: READ_BL_LEN=9, C_SIZE=0xECC (3788), C_SIZE_MULT=7
        // 容量 = 3789 * 2^9 * 512 字节
        let data2 = (9u32 << 16) | (0xECC >> 2); // 高 10 bit 的 C_SIZE
        let data1 = ((0xECCu32 & 0x3) << 30) | (7 << 15);
        let csd = Csd {
            data: [0, data1, data2, 0],
        };
        assert_eq!(csd.structure(), 0);

        let geometry = csd.decode().unwrap();
        assert_eq!(geometry.block_len, 512);
        assert_eq!(geometry.block_count, 3789 * 512);
    }

    #[test]
    fn test_csd_v1_normalizes_block_len() {
        // READ_BL_LEN=10 (1024 字节块) 归一化为 512 字节块
        let data2 = (10u32 << 16) | (0xECC >> 2);
        let data1 = ((0xECCu32 & 0x3) << 30) | (7 << 15);
        let csd = Csd {
            data: [0, data1, data2, 0],
        };

        let geometry = csd.decode().unwrap();
        assert_eq!(geometry.block_len, 512);
        assert_eq!(geometry.block_count, 3789 * 512 * 2);
    }

    #[test]
    fn test_csd_unsupported_structure() {
        let csd = Csd {
            data: [0, 0, 0, 0xC000_0000],
        };
        assert_eq!(csd.structure(), 3);
        assert_eq!(csd.decode(), Err(SdCardError::UnsupportedCsd));
    }

    #[test]
    fn test_apply_csd() {
        let mut card = SdCard {
            slot: 1,
            rca: 0,
            block_len: SDCARD_DEFAULT_BLOCK_SIZE,
            block_count: 0,
            initialized: false,
        };

        let csd = Csd {
            data: [0x0A4040AF, 0x3B377F80, 0x5B590000, 0x400E0032],
        };
        card.apply_csd(&csd).unwrap();
        assert_eq!(card.geometry().block_count, (0x3B37 + 1) * 1024);
        assert_eq!(card.geometry().capacity_bytes(), (0x3B37u64 + 1) * 1024 * 512);
    }
}
