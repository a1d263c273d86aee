//! 存储引导
//!
//! 上电后、任何任务启动之前执行一次的存储初始化流程:
//!
//! 1. 挂载主文件系统 (板载 Flash 上的 LittleFS); 失败时用同一编程
//!    粒度格式化后再挂载一次, 第二次失败为致命错误 (不再重试)。
//! 2. 挂载成功后绑定 `/flash`, 设为工作目录并追加到搜索路径。
//! 3. 主文件系统上存在哨兵文件 `SKIPSD` 时跳过 SD 卡。
//! 4. 否则打开 SD 卡插槽: 无卡静默跳过, 挂载失败记录警告后继续,
//!    成功则绑定 `/sdcard`, 设为工作目录并前插到搜索路径。
//!
//! 错误策略分两级: 主存储错误升级 (一次破坏性格式化重试, 之后致命),
//! 可移动存储错误全部就地吸收。整个流程单线程同步执行, 结束前系统
//! 中没有其他执行者, 因此 [`BootContext`] 的变更无需加锁。

use core::fmt;

use heapless::{String, Vec};

use crate::config;
use crate::config::{MOUNT_PATH_LEN, SEARCH_PATH_DEPTH};
use crate::fs::littlefs::FsError;
use crate::vfs::{FsKind, MountTable, VfsError};
#[allow(unused_imports)]
use crate::util::log::*;

// ==================== 接缝接口 ====================

/// 主存储卷 (必选, 板载 Flash)
pub trait PrimaryVolume {
    /// 挂载, `prog_size` 为 Flash 编程粒度
    fn mount(&mut self, prog_size: u32) -> Result<(), FsError>;

    /// 格式化 (破坏性), 必须与挂载使用同一 `prog_size`
    fn format(&mut self, prog_size: u32) -> Result<(), FsError>;

    /// 检查文件是否存在 (哨兵文件判定)
    fn exists(&self, name: &str) -> Result<bool, FsError>;
}

/// 可移动存储卷 (可选, SD 卡上的 FAT)
pub trait RemovableVolume {
    /// 错误类型须可被当前日志后端格式化 (挂载失败记录警告)
    type Error: Loggable;

    fn mount(&mut self) -> Result<(), Self::Error>;
}

/// 可移动存储插槽
pub trait RemovableSlot {
    type Volume: RemovableVolume;

    /// 打开插槽中的卡, 未检测到卡时返回 `None`
    fn open(&mut self, slot: u8) -> Option<Self::Volume>;
}

// ==================== 错误与结果 ====================

/// 致命引导错误 (仅主存储路径)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum BootError {
    /// 格式化后的二次挂载仍然失败
    PrimaryMount(FsError),
    /// 格式化失败
    PrimaryFormat(FsError),
    /// 引导上下文登记失败 (挂载点/路径)
    MountPoint(VfsError),
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryMount(e) => write!(f, "Primary mount failed after format: {}", e),
            Self::PrimaryFormat(e) => write!(f, "Primary format failed: {}", e),
            Self::MountPoint(e) => write!(f, "Mount registration failed: {}", e),
        }
    }
}

/// 主存储挂载结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryOutcome {
    /// 既有镜像直接挂载成功, 未执行格式化
    MountedExisting,
    /// 首次挂载失败, 格式化一次后挂载成功
    Formatted,
}

/// 可移动存储终态 (全部非致命)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovableStatus {
    /// 哨兵文件存在, 未访问卡驱动
    SkippedMarker,
    /// 插槽中没有卡
    SkippedNoCard,
    /// 挂载成功
    Mounted,
    /// 挂载失败 (已记录警告)
    Failed,
}

/// 可移动存储挂载结果, 成功时携带卷句柄
#[derive(Debug)]
pub enum Removable<V> {
    SkippedMarker,
    SkippedNoCard,
    Mounted(V),
    Failed,
}

impl<V> Removable<V> {
    /// 终态 (不带句柄)
    pub fn status(&self) -> RemovableStatus {
        match self {
            Self::SkippedMarker => RemovableStatus::SkippedMarker,
            Self::SkippedNoCard => RemovableStatus::SkippedNoCard,
            Self::Mounted(_) => RemovableStatus::Mounted,
            Self::Failed => RemovableStatus::Failed,
        }
    }

    /// 是否挂载成功
    pub fn is_mounted(&self) -> bool {
        matches!(self, Self::Mounted(_))
    }
}

/// 两个阶段的引导结果汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    pub primary: PrimaryOutcome,
    pub removable: RemovableStatus,
}

// ==================== 引导上下文 ====================

/// 引导上下文
///
/// 挂载表、工作目录与模块搜索路径的显式载体, 引导完成后整体移交
/// 给后续启动阶段, 取代散落的全局状态。
#[derive(Debug)]
pub struct BootContext {
    mounts: MountTable,
    working_dir: String<MOUNT_PATH_LEN>,
    search_path: Vec<String<MOUNT_PATH_LEN>, SEARCH_PATH_DEPTH>,
}

impl BootContext {
    /// 创建空上下文
    pub const fn new() -> Self {
        Self {
            mounts: MountTable::new(),
            working_dir: String::new(),
            search_path: Vec::new(),
        }
    }

    /// 绑定文件系统到挂载点
    pub fn bind(&mut self, path: &str, kind: FsKind) -> Result<(), VfsError> {
        self.mounts.bind(path, kind)
    }

    /// 设置当前工作目录
    pub fn set_working_dir(&mut self, path: &str) -> Result<(), VfsError> {
        self.working_dir.clear();
        self.working_dir
            .push_str(path)
            .map_err(|_| VfsError::PathTooLong)
    }

    /// 追加搜索路径条目 (末尾)
    pub fn append_search_path(&mut self, path: &str) -> Result<(), VfsError> {
        let entry = Self::path_entry(path)?;
        self.search_path
            .push(entry)
            .map_err(|_| VfsError::SearchPathFull)
    }

    /// 前插搜索路径条目 (最高优先级)
    pub fn prepend_search_path(&mut self, path: &str) -> Result<(), VfsError> {
        let entry = Self::path_entry(path)?;
        self.search_path
            .insert(0, entry)
            .map_err(|_| VfsError::SearchPathFull)
    }

    fn path_entry(path: &str) -> Result<String<MOUNT_PATH_LEN>, VfsError> {
        let mut entry = String::new();
        entry.push_str(path).map_err(|_| VfsError::PathTooLong)?;
        Ok(entry)
    }

    /// 当前工作目录
    pub fn working_dir(&self) -> &str {
        self.working_dir.as_str()
    }

    /// 模块搜索路径 (按查找顺序)
    pub fn search_path(&self) -> &[String<MOUNT_PATH_LEN>] {
        &self.search_path
    }

    /// 挂载表
    pub fn mounts(&self) -> &MountTable {
        &self.mounts
    }
}

impl Default for BootContext {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== 引导操作 ====================

/// 挂载主文件系统
///
/// 失败时格式化一次再挂载; 格式化失败或二次挂载失败直接返回致命
/// 错误, 不再增加重试层。成功后绑定 [`config::FLASH_MOUNT_POINT`],
/// 设为工作目录并追加到搜索路径 (严格按此顺序)。
pub fn mount_primary<V: PrimaryVolume>(
    volume: &mut V,
    prog_size: u32,
    ctx: &mut BootContext,
) -> Result<PrimaryOutcome, BootError> {
    let outcome = match volume.mount(prog_size) {
        Ok(()) => PrimaryOutcome::MountedExisting,
        Err(mount_err) => {
            // 无有效镜像: 格式化后重挂载, 既有内容全部丢失
            log_warn!("Primary mount failed ({}), formatting flash", mount_err);
            volume.format(prog_size).map_err(BootError::PrimaryFormat)?;
            volume.mount(prog_size).map_err(BootError::PrimaryMount)?;
            PrimaryOutcome::Formatted
        }
    };

    ctx.bind(config::FLASH_MOUNT_POINT, FsKind::LittleFs)
        .map_err(BootError::MountPoint)?;
    ctx.set_working_dir(config::FLASH_MOUNT_POINT)
        .map_err(BootError::MountPoint)?;
    ctx.append_search_path(config::FLASH_MOUNT_POINT)
        .map_err(BootError::MountPoint)?;

    log_info!(
        "Primary filesystem mounted at {}",
        config::FLASH_MOUNT_POINT
    );
    Ok(outcome)
}

/// 挂载可移动文件系统 (永不致命)
///
/// 主文件系统上存在哨兵文件时直接跳过, 不触碰卡驱动; 无卡静默跳过;
/// 任何挂载失败记录警告后继续。成功时绑定
/// [`config::SDCARD_MOUNT_POINT`], 设为工作目录并前插到搜索路径,
/// 使卡上代码优先于 Flash 上的同名模块。
pub fn mount_removable<P, S>(
    primary: &P,
    slot: &mut S,
    slot_id: u8,
    marker: &str,
    ctx: &mut BootContext,
) -> Removable<S::Volume>
where
    P: PrimaryVolume,
    S: RemovableSlot,
{
    // 哨兵判定取存在性, stat 错误按"不存在"处理继续流程
    if let Ok(true) = primary.exists(marker) {
        log_info!("Marker {} present, skipping SD card", marker);
        return Removable::SkippedMarker;
    }

    let mut volume = match slot.open(slot_id) {
        Some(volume) => volume,
        None => return Removable::SkippedNoCard,
    };

    if let Err(err) = volume.mount() {
        log_warn!("Mounting SD card failed: {}", err);
        return Removable::Failed;
    }

    let registered = ctx
        .bind(config::SDCARD_MOUNT_POINT, FsKind::Fat)
        .and_then(|_| ctx.set_working_dir(config::SDCARD_MOUNT_POINT))
        .and_then(|_| ctx.prepend_search_path(config::SDCARD_MOUNT_POINT));
    if let Err(err) = registered {
        log_warn!("SD card registration failed: {}", err);
        return Removable::Failed;
    }

    log_info!(
        "SD card mounted at {}",
        config::SDCARD_MOUNT_POINT
    );
    Removable::Mounted(volume)
}

/// 完整引导流程
///
/// 用默认常量依次执行两个阶段, 返回移交给后续启动阶段的上下文与
/// 结果汇总。主存储失败时返回错误, 由固件入口停机。
pub fn run<P, S>(primary: &mut P, slot: &mut S) -> Result<(BootContext, BootReport), BootError>
where
    P: PrimaryVolume,
    S: RemovableSlot,
{
    let mut ctx = BootContext::new();

    let primary_outcome = mount_primary(primary, config::FLASH_PROG_SIZE, &mut ctx)?;

    let removable = mount_removable(
        primary,
        slot,
        config::SDCARD_SLOT,
        config::SKIP_SD_MARKER,
        &mut ctx,
    );

    Ok((
        ctx,
        BootReport {
            primary: primary_outcome,
            removable: removable.status(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::littlefs::{FileSystem, FsError};
    use crate::fs::storage::{RamDisk, StorageError};

    // ==================== 假件 ====================

    /// 记录调用情况的主存储假件
    struct FakePrimary {
        image_valid: bool,
        mount_always_fails: bool,
        format_fails: bool,
        marker_present: bool,
        mount_calls: u32,
        format_calls: u32,
    }

    impl FakePrimary {
        fn new() -> Self {
            Self {
                image_valid: false,
                mount_always_fails: false,
                format_fails: false,
                marker_present: false,
                mount_calls: 0,
                format_calls: 0,
            }
        }

        fn with_valid_image() -> Self {
            Self {
                image_valid: true,
                ..Self::new()
            }
        }
    }

    impl PrimaryVolume for FakePrimary {
        fn mount(&mut self, _prog_size: u32) -> Result<(), FsError> {
            self.mount_calls += 1;
            if self.image_valid && !self.mount_always_fails {
                Ok(())
            } else {
                Err(FsError::Corrupt)
            }
        }

        fn format(&mut self, _prog_size: u32) -> Result<(), FsError> {
            self.format_calls += 1;
            if self.format_fails {
                Err(FsError::Storage(StorageError::EraseError))
            } else {
                self.image_valid = true;
                Ok(())
            }
        }

        fn exists(&self, name: &str) -> Result<bool, FsError> {
            Ok(self.marker_present && name == crate::config::SKIP_SD_MARKER)
        }
    }

    struct FakeVolume {
        mount_fails: bool,
    }

    impl RemovableVolume for FakeVolume {
        type Error = FsError;

        fn mount(&mut self) -> Result<(), FsError> {
            if self.mount_fails {
                Err(FsError::Corrupt)
            } else {
                Ok(())
            }
        }
    }

    /// 插槽假件: `card` 为 `None` 模拟空插槽
    struct FakeSlot {
        card: Option<FakeVolume>,
        open_calls: u32,
    }

    impl FakeSlot {
        fn empty() -> Self {
            Self {
                card: None,
                open_calls: 0,
            }
        }

        fn with_card() -> Self {
            Self {
                card: Some(FakeVolume { mount_fails: false }),
                open_calls: 0,
            }
        }

        fn with_bad_card() -> Self {
            Self {
                card: Some(FakeVolume { mount_fails: true }),
                open_calls: 0,
            }
        }
    }

    impl RemovableSlot for FakeSlot {
        type Volume = FakeVolume;

        fn open(&mut self, _slot: u8) -> Option<FakeVolume> {
            self.open_calls += 1;
            self.card.take()
        }
    }

    // ==================== 主存储 ====================

    #[test]
    fn test_blank_device_formats_exactly_once() {
        let mut primary = FakePrimary::new();
        let mut ctx = BootContext::new();

        let outcome = mount_primary(&mut primary, 256, &mut ctx).unwrap();
        assert_eq!(outcome, PrimaryOutcome::Formatted);
        assert_eq!(primary.format_calls, 1);
        assert_eq!(primary.mount_calls, 2);
    }

    #[test]
    fn test_valid_image_never_formats() {
        let mut primary = FakePrimary::with_valid_image();
        let mut ctx = BootContext::new();

        let outcome = mount_primary(&mut primary, 256, &mut ctx).unwrap();
        assert_eq!(outcome, PrimaryOutcome::MountedExisting);
        assert_eq!(primary.format_calls, 0);
        assert_eq!(primary.mount_calls, 1);
    }

    #[test]
    fn test_primary_context_mutation() {
        let mut primary = FakePrimary::with_valid_image();
        let mut ctx = BootContext::new();

        mount_primary(&mut primary, 256, &mut ctx).unwrap();
        assert_eq!(ctx.working_dir(), "/flash");
        assert_eq!(ctx.search_path().len(), 1);
        assert_eq!(ctx.search_path()[0].as_str(), "/flash");
        assert_eq!(ctx.mounts().find("/flash").unwrap().kind, FsKind::LittleFs);
    }

    #[test]
    fn test_format_failure_is_fatal() {
        let mut primary = FakePrimary::new();
        primary.format_fails = true;
        let mut ctx = BootContext::new();

        let err = mount_primary(&mut primary, 256, &mut ctx).unwrap_err();
        assert_eq!(
            err,
            BootError::PrimaryFormat(FsError::Storage(StorageError::EraseError))
        );
        // 上下文未被污染
        assert_eq!(ctx.working_dir(), "");
        assert!(ctx.mounts().is_empty());
    }

    #[test]
    fn test_second_mount_failure_is_fatal() {
        let mut primary = FakePrimary::new();
        primary.mount_always_fails = true;
        let mut ctx = BootContext::new();

        let err = mount_primary(&mut primary, 256, &mut ctx).unwrap_err();
        assert_eq!(err, BootError::PrimaryMount(FsError::Corrupt));
        // 格式化只发生一次, 之后没有额外的重试层
        assert_eq!(primary.format_calls, 1);
        assert_eq!(primary.mount_calls, 2);
    }

    // ==================== 可移动存储 ====================

    fn booted_ctx(primary: &mut FakePrimary) -> BootContext {
        let mut ctx = BootContext::new();
        mount_primary(primary, 256, &mut ctx).unwrap();
        ctx
    }

    #[test]
    fn test_marker_skips_card_driver_entirely() {
        let mut primary = FakePrimary::with_valid_image();
        primary.marker_present = true;
        let mut slot = FakeSlot::with_card();
        let mut ctx = booted_ctx(&mut primary);

        let removable = mount_removable(&primary, &mut slot, 1, "SKIPSD", &mut ctx);
        assert_eq!(removable.status(), RemovableStatus::SkippedMarker);
        assert_eq!(slot.open_calls, 0);
        assert_eq!(ctx.working_dir(), "/flash");
    }

    #[test]
    fn test_empty_slot_is_silent_skip() {
        let mut primary = FakePrimary::with_valid_image();
        let mut slot = FakeSlot::empty();
        let mut ctx = booted_ctx(&mut primary);

        let removable = mount_removable(&primary, &mut slot, 1, "SKIPSD", &mut ctx);
        assert_eq!(removable.status(), RemovableStatus::SkippedNoCard);
        assert_eq!(slot.open_calls, 1);
        // 工作目录与搜索路径未被改动
        assert_eq!(ctx.working_dir(), "/flash");
        assert_eq!(ctx.search_path().len(), 1);
    }

    #[test]
    fn test_card_mount_failure_is_absorbed() {
        let mut primary = FakePrimary::with_valid_image();
        let mut slot = FakeSlot::with_bad_card();
        let mut ctx = booted_ctx(&mut primary);

        let removable = mount_removable(&primary, &mut slot, 1, "SKIPSD", &mut ctx);
        assert_eq!(removable.status(), RemovableStatus::Failed);
        assert_eq!(ctx.working_dir(), "/flash");
        assert!(!ctx.mounts().is_bound("/sdcard"));
    }

    #[test]
    fn test_card_mounted_takes_precedence() {
        let mut primary = FakePrimary::with_valid_image();
        let mut slot = FakeSlot::with_card();
        let mut ctx = booted_ctx(&mut primary);

        let removable = mount_removable(&primary, &mut slot, 1, "SKIPSD", &mut ctx);
        assert!(removable.is_mounted());
        assert_eq!(ctx.working_dir(), "/sdcard");
        // 卡上代码优先: /sdcard 在 /flash 之前
        assert_eq!(ctx.search_path()[0].as_str(), "/sdcard");
        assert_eq!(ctx.search_path()[1].as_str(), "/flash");
        assert_eq!(ctx.mounts().find("/sdcard").unwrap().kind, FsKind::Fat);
    }

    // ==================== 端到端场景 (真实主文件系统) ====================

    type TestDisk = RamDisk<4, 1024>;

    #[test]
    fn test_scenario_empty_flash() {
        // 场景 A: 空 Flash → 格式化后挂载, 工作目录 /flash
        let mut primary = FileSystem::new(TestDisk::new());
        let mut slot = FakeSlot::empty();

        let (ctx, report) = run(&mut primary, &mut slot).unwrap();
        assert_eq!(report.primary, PrimaryOutcome::Formatted);
        assert_eq!(report.removable, RemovableStatus::SkippedNoCard);
        assert_eq!(ctx.working_dir(), "/flash");
        assert!(primary.is_mounted());
    }

    #[test]
    fn test_scenario_formatted_flash_with_card() {
        // 场景 B: 已格式化 Flash + 有效卡 → 工作目录 /sdcard,
        // 搜索路径中 /sdcard 在 /flash 之前
        let mut device = TestDisk::new();
        {
            let mut fs = FileSystem::new(device);
            fs.format(crate::config::FLASH_PROG_SIZE).unwrap();
            device = fs.into_device();
        }
        let mut primary = FileSystem::new(device);
        let mut slot = FakeSlot::with_card();

        let (ctx, report) = run(&mut primary, &mut slot).unwrap();
        assert_eq!(report.primary, PrimaryOutcome::MountedExisting);
        assert_eq!(report.removable, RemovableStatus::Mounted);
        assert_eq!(ctx.working_dir(), "/sdcard");
        assert_eq!(ctx.search_path()[0].as_str(), "/sdcard");
        assert_eq!(ctx.search_path()[1].as_str(), "/flash");
    }

    #[test]
    fn test_scenario_marker_present() {
        // 场景 C: 已格式化 Flash + SKIPSD → 工作目录 /flash, 不触碰卡
        let mut device = TestDisk::new();
        {
            let mut fs = FileSystem::new(device);
            fs.format(crate::config::FLASH_PROG_SIZE).unwrap();
            fs.mount(crate::config::FLASH_PROG_SIZE).unwrap();
            fs.touch(crate::config::SKIP_SD_MARKER).unwrap();
            device = fs.into_device();
        }
        let mut primary = FileSystem::new(device);
        let mut slot = FakeSlot::with_card();

        let (ctx, report) = run(&mut primary, &mut slot).unwrap();
        assert_eq!(report.primary, PrimaryOutcome::MountedExisting);
        assert_eq!(report.removable, RemovableStatus::SkippedMarker);
        assert_eq!(ctx.working_dir(), "/flash");
        assert_eq!(slot.open_calls, 0);
    }
}
