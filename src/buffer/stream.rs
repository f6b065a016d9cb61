//! 流缓冲区
//!
//! 在单个写入方与单个读取方之间传递字节流:
//! - 发送: 缓冲区满时阻塞 (带超时)，之后尽量写入，允许部分写入
//! - 接收: 缓冲区空时阻塞 (带超时)，之后尽量读取，允许部分读取
//! - 数据量达到触发水位才唤醒阻塞的读取方
//!
//! # Example
//! ```ignore
//! let buffer = StreamBuffer::create(BufferConfig::new(64), scheduler)?;
//!
//! // 中断: 写入采样
//! let outcome = buffer.send_from_isr(&sample);
//! outcome.yield_if_woken(&scheduler);
//!
//! // 任务: 最多等待 100ms
//! let n = buffer.receive(&mut rx, Duration::from_millis(100));
//! ```

use embassy_time::Duration;

use crate::config::BufferConfig;
use crate::error::Error;
use crate::notify::{Context, NotifyWake, WakeStrategy};
use crate::sched::Scheduler;

use super::channel::{BufferCore, Transfer};
use super::{IsrOutcome, Mode};

/// 字节流缓冲区
pub struct StreamBuffer<'a, S: Scheduler, W = NotifyWake> {
    core: BufferCore<'a, S, W>,
}

#[cfg(any(test, feature = "alloc"))]
impl<S: Scheduler> StreamBuffer<'static, S, NotifyWake> {
    /// 从堆上分配存储并创建
    pub fn create(config: BufferConfig, scheduler: S) -> Result<Self, Error> {
        Self::create_with_wake(config, None, scheduler, NotifyWake)
    }
}

impl<'a, S: Scheduler> StreamBuffer<'a, S, NotifyWake> {
    /// 使用调用者提供的存储创建 (不分配)
    ///
    /// 只使用存储的前 `config.capacity` 字节。
    pub fn create_static(
        config: BufferConfig,
        storage: &'a mut [u8],
        scheduler: S,
    ) -> Result<Self, Error> {
        Self::create_with_wake(config, Some(storage), scheduler, NotifyWake)
    }
}

impl<'a, S, W> StreamBuffer<'a, S, W>
where
    S: Scheduler,
    W: WakeStrategy<S>,
{
    /// 通用创建: 可选存储 + 自定义唤醒策略
    ///
    /// `storage` 为 `None` 时从堆上分配，未启用 `alloc` 时返回 [`Error::StorageMissing`]。
    pub fn create_with_wake(
        config: BufferConfig,
        storage: Option<&'a mut [u8]>,
        scheduler: S,
        wake: W,
    ) -> Result<Self, Error> {
        Ok(Self {
            core: BufferCore::new(&config, storage, 0, scheduler, wake)?,
        })
    }

    /// 发送字节
    ///
    /// 缓冲区满且 `timeout` 非 0 时阻塞等待空间，之后写入尽可能多的字节。
    ///
    /// # Returns
    /// 实际写入的字节数，超时仍无空间时为 0
    pub fn send(&self, data: &[u8], timeout: Duration) -> usize {
        if data.is_empty() {
            return 0;
        }
        self.core
            .send_with(1, timeout, |store| Transfer::raw(store.write(data)))
            .bytes
    }

    /// 中断上下文发送，从不阻塞
    pub fn send_from_isr(&self, data: &[u8]) -> IsrOutcome {
        self.core
            .send_from_isr_with(|store| Transfer::raw(store.write(data)))
    }

    /// 接收字节
    ///
    /// 缓冲区空且 `timeout` 非 0 时阻塞等待数据，之后读取尽可能多的字节。
    ///
    /// # Returns
    /// 实际读取的字节数，超时仍无数据时为 0
    pub fn receive(&self, out: &mut [u8], timeout: Duration) -> usize {
        if out.is_empty() {
            return 0;
        }
        self.core
            .receive_with(1, timeout, |store| Transfer::raw(store.read(out)))
            .bytes
    }

    /// 中断上下文接收，从不阻塞
    pub fn receive_from_isr(&self, out: &mut [u8]) -> IsrOutcome {
        self.core
            .receive_from_isr_with(|store| Transfer::raw(store.read(out)))
    }

    /// 复位为空
    ///
    /// 有任务阻塞在本缓冲区上时返回 [`Error::BufferBusy`]，状态不变。
    /// 成功时触发水位恢复为默认值。
    pub fn reset(&self) -> Result<(), Error> {
        self.core.reset(Context::Task)
    }

    /// 中断上下文复位
    pub fn reset_from_isr(&self) -> Result<(), Error> {
        self.core.reset(Context::Isr)
    }

    /// 设置触发水位，0 视为 1，超过容量时失败
    pub fn set_trigger_level(&self, level: usize) -> Result<(), Error> {
        self.core.set_trigger_level(level)
    }

    /// 当前触发水位
    pub fn trigger_level(&self) -> usize {
        self.core.trigger_level()
    }

    /// 直接唤醒阻塞的读取方 (延迟唤醒策略在对端核心调用)
    pub fn send_completed_from_isr(&self) -> bool {
        self.core.send_completed_from_isr()
    }

    /// 直接唤醒阻塞的写入方 (延迟唤醒策略在对端核心调用)
    pub fn receive_completed_from_isr(&self) -> bool {
        self.core.receive_completed_from_isr()
    }

    // ===== 查询 =====

    /// 缓冲区容量
    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    /// 剩余空间
    pub fn space_available(&self) -> usize {
        self.core.space_available()
    }

    /// 可读字节数
    pub fn bytes_available(&self) -> usize {
        self.core.bytes_available()
    }

    /// 是否已满
    pub fn is_full(&self) -> bool {
        self.core.space_available() == 0
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.core.bytes_available() == 0
    }

    /// 缓冲区模式
    pub const fn mode(&self) -> Mode {
        Mode::Stream
    }

    /// 存储是否由调用者提供
    pub fn uses_static_storage(&self) -> bool {
        self.core.uses_static_storage()
    }

    /// 唤醒策略
    pub fn wake_strategy(&self) -> &W {
        self.core.wake_strategy()
    }
}
