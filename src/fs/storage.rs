//! Flash 存储抽象层
//!
//! 提供文件系统驱动所需的块设备接口, 以及两个实现:
//! - [`FlashStorage`]: 板载 SPI Flash 的存储分区
//! - [`RamDisk`]: RAM 盘, 用于开发调试与主机端测试

use core::fmt;

/// 存储操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum StorageError {
    /// 读取失败
    ReadError,
    /// 写入失败
    WriteError,
    /// 擦除失败
    EraseError,
    /// 地址越界
    OutOfBounds,
    /// 对齐错误
    AlignmentError,
    /// 未初始化
    NotInitialized,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadError => write!(f, "Flash read error"),
            Self::WriteError => write!(f, "Flash write error"),
            Self::EraseError => write!(f, "Flash erase error"),
            Self::OutOfBounds => write!(f, "Address out of bounds"),
            Self::AlignmentError => write!(f, "Address alignment error"),
            Self::NotInitialized => write!(f, "Not initialized"),
        }
    }
}

/// 块设备接口
///
/// 文件系统驱动 (LittleFS / FAT) 通过该接口访问底层存储。
/// 块内偏移读写由设备负责做越界检查; `page_size` 是最小编程粒度,
/// 上层传入的编程尺寸必须是它的整数倍。
pub trait BlockDevice {
    /// 从指定块的偏移处读取数据
    fn read(&self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), StorageError>;

    /// 向指定块的偏移处编程数据 (目标区域须已擦除)
    fn prog(&mut self, block: u32, offset: u32, data: &[u8]) -> Result<(), StorageError>;

    /// 擦除整个块 (全部置 0xFF)
    fn erase(&mut self, block: u32) -> Result<(), StorageError>;

    /// 确保所有写入落盘
    fn sync(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    /// 块数
    fn block_count(&self) -> u32;

    /// 块大小 (字节)
    fn block_size(&self) -> u32;

    /// 最小编程粒度 (字节)
    fn page_size(&self) -> u32;
}

/// Flash 存储配置
#[derive(Debug, Clone, Copy)]
pub struct FlashConfig {
    /// 总容量 (字节)
    pub total_size: u32,
    /// 扇区大小 (通常 4KB)
    pub sector_size: u32,
    /// 块大小 (文件系统视角, 通常 4KB)
    pub block_size: u32,
    /// 页面大小 (编程单位, 通常 256B)
    pub page_size: u32,
    /// 存储分区起始偏移
    pub partition_offset: u32,
    /// 存储分区大小
    pub partition_size: u32,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            total_size: 16 * 1024 * 1024, // 16MB
            sector_size: 4096,
            block_size: 4096,
            page_size: 256,
            partition_offset: 0x410000,
            partition_size: 0xBF0000, // ~12MB
        }
    }
}

/// 板载 Flash 存储分区
///
/// 引导流程中作为主文件系统的后备块设备。
pub struct FlashStorage {
    /// 配置
    config: FlashConfig,
    /// 是否已初始化
    initialized: bool,
}

impl FlashStorage {
    /// 创建 Flash 存储实例
    pub const fn new(config: FlashConfig) -> Self {
        Self {
            config,
            initialized: false,
        }
    }

    /// 使用默认配置创建
    pub const fn with_defaults() -> Self {
        Self::new(FlashConfig {
            total_size: 16 * 1024 * 1024,
            sector_size: 4096,
            block_size: 4096,
            page_size: 256,
            partition_offset: 0x410000,
            partition_size: 0xBF0000,
        })
    }

    /// 初始化存储, 校验分区几何参数
    pub fn init(&mut self) -> Result<(), StorageError> {
        if self.config.partition_offset + self.config.partition_size > self.config.total_size {
            return Err(StorageError::OutOfBounds);
        }

        if self.config.block_size % self.config.sector_size != 0 {
            return Err(StorageError::AlignmentError);
        }

        self.initialized = true;
        Ok(())
    }

    /// 检查是否已初始化
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 获取配置
    pub fn config(&self) -> &FlashConfig {
        &self.config
    }

    /// 将块号转换为 Flash 绝对地址
    fn block_to_address(&self, block: u32) -> Result<u32, StorageError> {
        let offset = block
            .checked_mul(self.config.block_size)
            .ok_or(StorageError::OutOfBounds)?;
        if offset >= self.config.partition_size {
            return Err(StorageError::OutOfBounds);
        }
        Ok(self.config.partition_offset + offset)
    }

    /// 内部 Flash 读取
    ///
    /// # Safety
    /// 调用者必须保证地址在分区范围内。ESP32-S3 内部 Flash
    /// 数据映射到 0x3C000000+, 可直接读取。
    unsafe fn read_flash_internal(
        &self,
        address: u32,
        buffer: &mut [u8],
    ) -> Result<(), StorageError> {
        let flash_data_base: u32 = 0x3C00_0000;
        let mapped_addr = flash_data_base + address;

        let src = mapped_addr as *const u8;
        core::ptr::copy_nonoverlapping(src, buffer.as_mut_ptr(), buffer.len());

        Ok(())
    }

    /// 内部 Flash 编程
    ///
    /// # Safety
    /// 调用者必须保证地址在分区范围内, 且目标区域已擦除。
    ///
    /// # 实现说明
    /// ESP32-S3 内部 Flash 写入需要 ROM 函数 (esp_rom_spiflash_write),
    /// 内存映射只能读取。当前为占位实现, 按页面切分后返回 Ok 但不执行
    /// 实际写入; 实际应用应接入 esp-storage crate。
    unsafe fn write_flash_internal(&mut self, address: u32, data: &[u8]) -> Result<(), StorageError> {
        let page_size = self.config.page_size as usize;
        let mut offset = 0;

        while offset < data.len() {
            let current_addr = address + offset as u32;
            let page_offset = (current_addr % self.config.page_size) as usize;
            let write_size = core::cmp::min(page_size - page_offset, data.len() - offset);

            self.write_page_internal(current_addr, &data[offset..offset + write_size])?;

            offset += write_size;
        }

        Ok(())
    }

    /// 写入单个页面 (占位实现, 见 `write_flash_internal`)
    unsafe fn write_page_internal(&mut self, _address: u32, _data: &[u8]) -> Result<(), StorageError> {
        Ok(())
    }

    /// 擦除单个扇区
    ///
    /// # Safety
    /// 调用者必须保证地址在分区范围内。
    ///
    /// # 实现说明
    /// 占位实现, 返回 Ok 但不执行实际擦除; 实际应用应接入
    /// esp-storage crate 或 esp_rom_spiflash_erase_sector()。
    unsafe fn erase_sector_internal(&mut self, _address: u32) -> Result<(), StorageError> {
        Ok(())
    }
}

impl BlockDevice for FlashStorage {
    fn read(&self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        // checked_add: 溢出的 offset 不能绕过越界检查进入 unsafe 读取
        let end = offset
            .checked_add(buffer.len() as u32)
            .ok_or(StorageError::OutOfBounds)?;
        if end > self.config.block_size {
            return Err(StorageError::OutOfBounds);
        }

        let address = self.block_to_address(block)? + offset;
        unsafe { self.read_flash_internal(address, buffer) }
    }

    fn prog(&mut self, block: u32, offset: u32, data: &[u8]) -> Result<(), StorageError> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let end = offset
            .checked_add(data.len() as u32)
            .ok_or(StorageError::OutOfBounds)?;
        if end > self.config.block_size {
            return Err(StorageError::OutOfBounds);
        }

        let address = self.block_to_address(block)? + offset;
        unsafe { self.write_flash_internal(address, data) }
    }

    fn erase(&mut self, block: u32) -> Result<(), StorageError> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        let address = self.block_to_address(block)?;

        // 一个文件系统块可能覆盖多个物理扇区
        let sectors = self.config.block_size / self.config.sector_size;
        for i in 0..sectors {
            let sector_addr = address + i * self.config.sector_size;
            unsafe {
                self.erase_sector_internal(sector_addr)?;
            }
        }

        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }

        // Flash 写入是同步的, 无需额外操作
        Ok(())
    }

    fn block_count(&self) -> u32 {
        self.config.partition_size / self.config.block_size
    }

    fn block_size(&self) -> u32 {
        self.config.block_size
    }

    fn page_size(&self) -> u32 {
        self.config.page_size
    }
}

// ===== embedded-storage 接口适配 =====
//
// 以分区相对偏移暴露字节级访问, 供使用 embedded-storage 生态的
// 上层代码直接读写存储分区。

impl embedded_storage::ReadStorage for FlashStorage {
    type Error = StorageError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let end = offset
            .checked_add(bytes.len() as u32)
            .ok_or(StorageError::OutOfBounds)?;
        if end > self.config.partition_size {
            return Err(StorageError::OutOfBounds);
        }

        let address = self.config.partition_offset + offset;
        unsafe { self.read_flash_internal(address, bytes) }
    }

    fn capacity(&self) -> usize {
        self.config.partition_size as usize
    }
}

impl embedded_storage::Storage for FlashStorage {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        let end = offset
            .checked_add(bytes.len() as u32)
            .ok_or(StorageError::OutOfBounds)?;
        if end > self.config.partition_size {
            return Err(StorageError::OutOfBounds);
        }

        let address = self.config.partition_offset + offset;
        unsafe { self.write_flash_internal(address, bytes) }
    }
}

/// RAM 盘
///
/// 以 RAM 数组模拟 NOR Flash 块设备: 擦除态为 0xFF, 无真实编程
/// 粒度限制 (`page_size` = 1)。用于主机端测试与无硬件开发。
pub struct RamDisk<const BLOCKS: usize, const BLOCK_SIZE: usize> {
    data: [[u8; BLOCK_SIZE]; BLOCKS],
}

impl<const BLOCKS: usize, const BLOCK_SIZE: usize> RamDisk<BLOCKS, BLOCK_SIZE> {
    /// 创建 RAM 盘, 所有块处于擦除态
    pub fn new() -> Self {
        Self {
            data: [[0xFF; BLOCK_SIZE]; BLOCKS],
        }
    }

    fn check_range(&self, block: u32, offset: u32, len: usize) -> Result<(), StorageError> {
        if block as usize >= BLOCKS {
            return Err(StorageError::OutOfBounds);
        }
        let end = (offset as usize)
            .checked_add(len)
            .ok_or(StorageError::OutOfBounds)?;
        if end > BLOCK_SIZE {
            return Err(StorageError::OutOfBounds);
        }
        Ok(())
    }
}

impl<const BLOCKS: usize, const BLOCK_SIZE: usize> Default for RamDisk<BLOCKS, BLOCK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const BLOCKS: usize, const BLOCK_SIZE: usize> BlockDevice for RamDisk<BLOCKS, BLOCK_SIZE> {
    fn read(&self, block: u32, offset: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        self.check_range(block, offset, buffer.len())?;
        let start = offset as usize;
        buffer.copy_from_slice(&self.data[block as usize][start..start + buffer.len()]);
        Ok(())
    }

    fn prog(&mut self, block: u32, offset: u32, data: &[u8]) -> Result<(), StorageError> {
        self.check_range(block, offset, data.len())?;
        let start = offset as usize;
        self.data[block as usize][start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn erase(&mut self, block: u32) -> Result<(), StorageError> {
        if block as usize >= BLOCKS {
            return Err(StorageError::OutOfBounds);
        }
        self.data[block as usize] = [0xFF; BLOCK_SIZE];
        Ok(())
    }

    fn block_count(&self) -> u32 {
        BLOCKS as u32
    }

    fn block_size(&self) -> u32 {
        BLOCK_SIZE as u32
    }

    fn page_size(&self) -> u32 {
        1
    }
}
