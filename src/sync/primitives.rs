//! 同步原语封装
//!
//! 每个缓冲区实例独占一把 [`BufferRawMutex`]:
//! - 本核: 通过 `critical_section` 屏蔽中断，防止任务与 ISR 交错
//! - 跨核: 通过实例内的自旋标志互斥
//!
//! 基于 embassy-sync 的 `RawMutex` 接口实现，可直接用于
//! `embassy_sync::blocking_mutex::Mutex`。不存在全局缓冲区锁。

use core::hint::spin_loop;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use portable_atomic::{AtomicBool, Ordering};

/// 缓冲区级互斥锁
///
/// 临界区极短: 只覆盖等待者槽位的检查/登记/唤醒，不覆盖数据拷贝。
/// 同一上下文内不可重入 (重入会自旋死锁)。
pub struct BufferRawMutex {
    locked: AtomicBool,
}

impl BufferRawMutex {
    /// 创建未上锁的互斥锁
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// 当前是否被持有 (仅用于诊断)
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for BufferRawMutex {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: 本核中断已屏蔽，跨核由自旋标志串行化，
// 同一时刻只有一个上下文执行闭包
unsafe impl RawMutex for BufferRawMutex {
    const INIT: Self = Self::new();

    fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        with_critical_section(|_cs| {
            while self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                spin_loop();
            }

            let result = f();

            self.locked.store(false, Ordering::Release);
            result
        })
    }
}

/// 由 [`BufferRawMutex`] 保护的阻塞互斥容器
pub type BufferMutex<T> = Mutex<BufferRawMutex, T>;

// ===== 同步工具函数 =====

/// 在临界区中执行闭包
///
/// 禁用中断确保原子性，适用于非常短的操作
///
/// # Warning
/// 临界区内不能阻塞或执行长时间计算
#[inline]
pub fn with_critical_section<R, F>(f: F) -> R
where
    F: FnOnce(critical_section::CriticalSection) -> R,
{
    critical_section::with(f)
}

// ===== 原子标志 =====

/// 原子标志 - 最快的跨上下文通知
///
/// 用于延迟唤醒: 一侧置位，另一核的中断处理函数 test-and-clear
pub struct AtomicFlag {
    flag: AtomicBool,
}

impl AtomicFlag {
    /// 创建新的原子标志
    pub const fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// 设置标志
    #[inline(always)]
    pub fn set(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// 检查并清除标志 (test-and-clear)
    #[inline(always)]
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    /// 检查标志 (不清除)
    #[inline(always)]
    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new()
    }
}
