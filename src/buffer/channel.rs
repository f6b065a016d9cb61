//! 缓冲区共享核心 (StreamBufferCore)
//!
//! 流缓冲区与消息缓冲区共用的实现:
//! - 一个非阻塞的数据搬运例程 (由外层提供闭包)
//! - 一个薄的阻塞包装: 检查条件 → 互斥窗口内登记等待者 → 阻塞 → 被唤醒或超时后重试
//! - 发送完成时按触发水位唤醒读取方，接收完成时唤醒写入方
//!
//! 只有 `used` 计数与等待者槽位跨上下文共享，
//! 数据拷贝在互斥窗口之外进行。

use embassy_time::Duration;
use portable_atomic::{AtomicUsize, Ordering};

use crate::config::{BufferConfig, DEFAULT_TRIGGER_LEVEL};
use crate::error::Error;
use crate::notify::{Context, Role, WakeStrategy, WakeupNotifier};
use crate::sched::{Scheduler, TimeOut};
use crate::sync::ringbuffer::RingStore;
use crate::util::log::*;

use super::IsrOutcome;

/// 一次数据搬运的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transfer {
    /// 返回给调用者的字节数
    pub(crate) bytes: usize,
    /// 实际进出环形存储的字节数 (消息模式包含长度头)
    pub(crate) moved: usize,
}

impl Transfer {
    pub(crate) const NONE: Self = Self { bytes: 0, moved: 0 };

    /// 流模式: 返回值即搬运量
    #[inline]
    pub(crate) const fn raw(len: usize) -> Self {
        Self {
            bytes: len,
            moved: len,
        }
    }
}

/// 阻塞循环的单步决策 (在互斥窗口内做出)
enum Step {
    Ready,
    Expired,
    Block(Duration),
}

/// 缓冲区共享核心
pub(crate) struct BufferCore<'a, S: Scheduler, W> {
    store: RingStore<'a>,
    /// 唤醒读取方所需的最少字节数
    trigger_level: AtomicUsize,
    notifier: WakeupNotifier<S::Task>,
    scheduler: S,
    wake: W,
}

impl<'a, S, W> BufferCore<'a, S, W>
where
    S: Scheduler,
    W: WakeStrategy<S>,
{
    /// 创建核心
    ///
    /// `min_capacity` 为模式要求的容量下限 (不含)，流模式为 0，
    /// 消息模式为长度头大小。失败时不返回任何部分构造的缓冲区。
    pub(crate) fn new(
        config: &BufferConfig,
        storage: Option<&'a mut [u8]>,
        min_capacity: usize,
        scheduler: S,
        wake: W,
    ) -> Result<Self, Error> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        if capacity <= min_capacity {
            return Err(Error::CapacityTooSmall);
        }
        if config.trigger_level > capacity {
            return Err(Error::TriggerLevelTooHigh);
        }

        let store = match storage {
            Some(storage) => {
                if storage.len() < capacity {
                    return Err(Error::StorageTooSmall);
                }
                RingStore::with_storage(&mut storage[..capacity])?
            }
            None => Self::allocate(capacity)?,
        };

        log_debug!(
            "buffer created: capacity={} trigger={} static={}",
            capacity,
            config.trigger_level.max(1),
            store.is_static()
        );

        Ok(Self {
            store,
            trigger_level: AtomicUsize::new(config.trigger_level.max(1)),
            notifier: WakeupNotifier::new(),
            scheduler,
            wake,
        })
    }

    #[cfg(any(test, feature = "alloc"))]
    fn allocate(capacity: usize) -> Result<RingStore<'a>, Error> {
        RingStore::allocate(capacity)
    }

    #[cfg(not(any(test, feature = "alloc")))]
    fn allocate(_capacity: usize) -> Result<RingStore<'a>, Error> {
        Err(Error::StorageMissing)
    }

    // ===== 阻塞包装 =====

    /// 等待条件成立
    ///
    /// 条件检查与等待者登记在同一互斥窗口内完成，对端的唤醒不会丢失。
    /// 返回时本角色的等待者槽位总是空的。
    ///
    /// # Returns
    /// - `true`: 条件成立
    /// - `false`: 超时 (timeout 为 0 时只检查一次)
    fn wait_for(&self, role: Role, timeout: Duration, ready: impl Fn(&RingStore<'a>) -> bool) -> bool {
        let timer = TimeOut::start(self.scheduler.now(), timeout);

        loop {
            let step = self.notifier.with_slots(|slots| {
                if ready(&self.store) {
                    return Step::Ready;
                }
                match timer.remaining(self.scheduler.now()) {
                    None => Step::Expired,
                    Some(left) => {
                        self.scheduler.clear_notification();
                        slots.register(role, self.scheduler.current_task());
                        Step::Block(left)
                    }
                }
            });

            match step {
                Step::Ready => return true,
                Step::Expired => return false,
                Step::Block(left) => {
                    self.scheduler.block_current(left);
                    // 被唤醒时槽位已由对端清空，超时则由自己注销
                    self.notifier.with_slots(|slots| {
                        slots.deregister(role);
                    });
                }
            }
        }
    }

    // ===== 写入方 =====

    /// 任务上下文发送
    ///
    /// 空闲空间不足 `required` 时阻塞，之后执行 `write` 搬运数据。
    pub(crate) fn send_with(
        &self,
        required: usize,
        timeout: Duration,
        write: impl FnOnce(&RingStore<'a>) -> Transfer,
    ) -> Transfer {
        if !self.wait_for(Role::Writer, timeout, |store| store.free_space() >= required) {
            log_trace!("send timed out: required={} free={}", required, self.store.free_space());
        }

        let transfer = write(&self.store);
        if transfer.moved > 0 {
            self.send_completed(Context::Task);
        }
        transfer
    }

    /// 中断上下文发送 (不阻塞)
    pub(crate) fn send_from_isr_with(&self, write: impl FnOnce(&RingStore<'a>) -> Transfer) -> IsrOutcome {
        let transfer = write(&self.store);
        let woken = transfer.moved > 0 && self.send_completed(Context::Isr);
        IsrOutcome {
            bytes: transfer.bytes,
            higher_priority_woken: woken,
        }
    }

    /// 数据达到触发水位时唤醒读取方
    fn send_completed(&self, context: Context) -> bool {
        if self.store.used() >= self.trigger_level.load(Ordering::Relaxed) {
            self.wake
                .wake(&self.notifier, &self.scheduler, Role::Reader, context)
        } else {
            false
        }
    }

    // ===== 读取方 =====

    /// 任务上下文接收
    ///
    /// 已用字节不足 `min_available` 时阻塞，之后执行 `read` 搬运数据。
    pub(crate) fn receive_with(
        &self,
        min_available: usize,
        timeout: Duration,
        read: impl FnOnce(&RingStore<'a>) -> Transfer,
    ) -> Transfer {
        if !self.wait_for(Role::Reader, timeout, |store| store.used() >= min_available) {
            log_trace!("receive timed out: available={}", self.store.used());
        }

        let transfer = read(&self.store);
        if transfer.moved > 0 {
            self.receive_completed(Context::Task);
        }
        transfer
    }

    /// 中断上下文接收 (不阻塞)
    pub(crate) fn receive_from_isr_with(&self, read: impl FnOnce(&RingStore<'a>) -> Transfer) -> IsrOutcome {
        let transfer = read(&self.store);
        let woken = transfer.moved > 0 && self.receive_completed(Context::Isr);
        IsrOutcome {
            bytes: transfer.bytes,
            higher_priority_woken: woken,
        }
    }

    /// 有空间释放即唤醒写入方 (写入方触发水位恒为 1)
    fn receive_completed(&self, context: Context) -> bool {
        self.wake
            .wake(&self.notifier, &self.scheduler, Role::Writer, context)
    }

    // ===== 延迟唤醒完成 =====

    /// 直接唤醒读取方，绕过唤醒策略与触发水位
    pub(crate) fn send_completed_from_isr(&self) -> bool {
        self.notifier
            .wake(&self.scheduler, Role::Reader, Context::Isr)
    }

    /// 直接唤醒写入方，绕过唤醒策略
    pub(crate) fn receive_completed_from_isr(&self) -> bool {
        self.notifier
            .wake(&self.scheduler, Role::Writer, Context::Isr)
    }

    // ===== 控制 =====

    /// 复位
    ///
    /// 存在等待者时失败且不改变任何状态。成功时清空数据并把触发水位恢复为默认值。
    pub(crate) fn reset(&self, context: Context) -> Result<(), Error> {
        let result = self.notifier.with_slots(|slots| {
            if slots.any_waiting() {
                return Err(Error::BufferBusy);
            }
            self.store.reset();
            self.trigger_level
                .store(DEFAULT_TRIGGER_LEVEL, Ordering::Relaxed);
            Ok(())
        });

        if context == Context::Task {
            match result {
                Ok(()) => {
                    log_debug!("buffer reset");
                }
                Err(_) => {
                    log_warn!("buffer reset refused: waiter registered");
                }
            }
        }
        result
    }

    /// 设置触发水位，0 视为 1
    pub(crate) fn set_trigger_level(&self, level: usize) -> Result<(), Error> {
        if level > self.store.capacity() {
            return Err(Error::TriggerLevelTooHigh);
        }
        self.trigger_level.store(level.max(1), Ordering::Relaxed);
        Ok(())
    }

    // ===== 查询 =====

    #[inline]
    pub(crate) fn trigger_level(&self) -> usize {
        self.trigger_level.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.store.capacity()
    }

    #[inline]
    pub(crate) fn space_available(&self) -> usize {
        self.store.free_space()
    }

    #[inline]
    pub(crate) fn bytes_available(&self) -> usize {
        self.store.used()
    }

    #[inline]
    pub(crate) fn uses_static_storage(&self) -> bool {
        self.store.is_static()
    }

    #[inline]
    pub(crate) fn store(&self) -> &RingStore<'a> {
        &self.store
    }

    #[inline]
    pub(crate) fn wake_strategy(&self) -> &W {
        &self.wake
    }

    /// 指定角色当前是否阻塞在本缓冲区上
    #[cfg(test)]
    pub(crate) fn is_waiting(&self, role: Role) -> bool {
        self.notifier.is_waiting(role)
    }
}
