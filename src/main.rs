//! FlashBoot - ESP32-S3 存储引导固件
//!
//! 上电后第一时间完成存储初始化:
//! - 板载 Flash 上的 LittleFS 主文件系统 (首次启动自动格式化)
//! - 可选的 FAT SD 卡 (哨兵文件 SKIPSD 可跳过)
//!
//! 硬件目标: ESP32-S3-N16R8 (双核 Xtensa LX7 @ 240MHz, 16MB Flash)

#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::timer::timg::TimerGroup;

use flashboot::boot;
use flashboot::fs::{FileSystem, FlashStorage, SdmmcHost};

// ===== ESP-IDF 兼容 App Descriptor =====
esp_bootloader_esp_idf::esp_app_desc!();

// ===== 条件编译日志 =====
#[allow(unused_imports)]
use flashboot::util::log::*;

// ===== Panic Handler =====
#[cfg(feature = "dev")]
use esp_backtrace as _;

#[cfg(not(feature = "dev"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// 致命错误停机: 存储不可用时不进入任何任务
fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ===== 主入口点 =====
#[esp_rtos::main]
async fn main(_spawner: Spawner) {
    // ========================================
    // 1. 硬件初始化
    // ========================================
    let peripherals = esp_hal::init(esp_hal::Config::default());

    log_info!("{} v{} starting on ESP32-S3", flashboot::NAME, flashboot::VERSION);

    // ========================================
    // 2. 定时器初始化 (调度器时间驱动)
    // ========================================
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // ========================================
    // 3. 存储引导 (任何任务启动之前)
    // ========================================
    let mut storage = FlashStorage::with_defaults();
    if let Err(err) = storage.init() {
        log_error!("Flash init failed: {}", err);
        halt();
    }

    let mut primary = FileSystem::new(storage);
    let mut host = SdmmcHost::new();

    let ctx = match boot::run(&mut primary, &mut host) {
        Ok((ctx, report)) => {
            if report.primary == boot::PrimaryOutcome::Formatted {
                log_warn!("Flash was blank or corrupt, filesystem recreated");
            }
            log_info!("Storage ready, cwd={}", ctx.working_dir());
            ctx
        }
        Err(err) => {
            log_error!("Storage bootstrap failed: {}", err);
            halt();
        }
    };

    // 后续启动阶段在此接管 ctx (应用加载、任务生成)
    let _ = ctx;

    // ========================================
    // 4. 空闲循环
    // ========================================
    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
