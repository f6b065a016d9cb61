//! 唤醒通知器 (WakeupNotifier)
//!
//! 每个缓冲区最多一个阻塞写入方与一个阻塞读取方。
//!
//! # 无竞争阻塞协议
//!
//! 阻塞调用在同一个互斥窗口内:
//! 1. 检查条件是否已满足
//! 2. 若不满足，清除自身挂起通知并登记为等待者
//!
//! 离开窗口后才真正阻塞。对端的唤醒同样在互斥窗口内取出等待者并发送通知，
//! 通知是锁存的，因此在"登记"与"阻塞"之间送达的唤醒不会丢失。
//!
//! 每个角色的状态机: `NotWaiting → Waiting → NotWaiting`
//! (对端唤醒或超时后，阻塞调用总是自行注销)。
//!
//! # 唤醒策略
//!
//! [`WakeStrategy`] 决定"发送完成 / 接收完成"时如何唤醒对端:
//! - [`NotifyWake`]: 默认，直接使用调度器的任务通知
//! - [`CrossCoreWake`]: 延迟唤醒，置位挂起标志并触发核间中断，
//!   由另一核调用 `*_completed_from_isr` 完成唤醒

use core::cell::RefCell;

use crate::sched::Scheduler;
use crate::sync::primitives::{AtomicFlag, BufferMutex};
use crate::util::log::*;

/// 等待者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Role {
    /// 等待空间的写入方
    Writer,
    /// 等待数据的读取方
    Reader,
}

/// 调用上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Context {
    /// 任务上下文，可阻塞，可直接 yield
    Task,
    /// 中断上下文，不可阻塞，通过返回值报告是否需要调度
    Isr,
}

/// 等待者槽位
pub struct WaiterSlots<T> {
    writer: Option<T>,
    reader: Option<T>,
}

impl<T> WaiterSlots<T> {
    const fn new() -> Self {
        Self {
            writer: None,
            reader: None,
        }
    }

    fn slot(&mut self, role: Role) -> &mut Option<T> {
        match role {
            Role::Writer => &mut self.writer,
            Role::Reader => &mut self.reader,
        }
    }

    /// 登记等待者
    ///
    /// 同一角色只允许一个等待者 (单写单读约定)，debug 构建下检查
    pub fn register(&mut self, role: Role, task: T) {
        let slot = self.slot(role);
        debug_assert_msg!(
            slot.is_none(),
            "second waiter registered on one buffer, single writer/reader contract broken"
        );
        *slot = Some(task);
    }

    /// 注销等待者
    pub fn deregister(&mut self, role: Role) -> Option<T> {
        self.slot(role).take()
    }

    /// 指定角色是否有等待者
    pub fn is_waiting(&self, role: Role) -> bool {
        match role {
            Role::Writer => self.writer.is_some(),
            Role::Reader => self.reader.is_some(),
        }
    }

    /// 是否存在任何等待者
    pub fn any_waiting(&self) -> bool {
        self.writer.is_some() || self.reader.is_some()
    }
}

/// 唤醒通知器
///
/// 等待者槽位由缓冲区级互斥锁保护
pub struct WakeupNotifier<T> {
    slots: BufferMutex<RefCell<WaiterSlots<T>>>,
}

impl<T> WakeupNotifier<T> {
    /// 创建空通知器
    pub const fn new() -> Self {
        Self {
            slots: BufferMutex::new(RefCell::new(WaiterSlots::new())),
        }
    }

    /// 在互斥窗口内访问等待者槽位
    ///
    /// 闭包内不得阻塞，也不得再次进入同一缓冲区的互斥窗口
    pub fn with_slots<R>(&self, f: impl FnOnce(&mut WaiterSlots<T>) -> R) -> R {
        self.slots.lock(|slots| f(&mut slots.borrow_mut()))
    }

    /// 指定角色是否有等待者
    pub fn is_waiting(&self, role: Role) -> bool {
        self.with_slots(|slots| slots.is_waiting(role))
    }

    /// 是否存在任何等待者
    pub fn any_waiting(&self) -> bool {
        self.with_slots(|slots| slots.any_waiting())
    }
}

impl<T: Clone + Send> WakeupNotifier<T> {
    /// 唤醒指定角色的等待者
    ///
    /// 等待者在互斥窗口内被取出并通知。任务上下文中若唤醒了更高优先级
    /// 的任务，立即请求重新调度。
    ///
    /// # Returns
    /// 被唤醒的任务优先级是否高于当前运行上下文
    pub fn wake<S>(&self, scheduler: &S, role: Role, context: Context) -> bool
    where
        S: Scheduler<Task = T>,
    {
        let woken = self.with_slots(|slots| {
            let task = slots.deregister(role)?;
            scheduler.wake_task(&task);
            Some(task)
        });

        let Some(task) = woken else {
            return false;
        };

        let higher = scheduler.task_priority(&task) > scheduler.current_priority();
        if higher && context == Context::Task {
            scheduler.request_reschedule();
        }
        higher
    }
}

impl<T> Default for WakeupNotifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ===== 唤醒策略 =====

/// 唤醒策略
///
/// 在发送完成 (`Role::Reader`) 或接收完成 (`Role::Writer`) 时被调用。
/// 实现必须保持"每角色至多一个等待者"以及互斥窗口内唤醒的约定。
pub trait WakeStrategy<S: Scheduler> {
    /// 唤醒 `role` 一侧的等待者
    ///
    /// # Returns
    /// 是否唤醒了比当前上下文优先级更高的任务
    fn wake(
        &self,
        notifier: &WakeupNotifier<S::Task>,
        scheduler: &S,
        role: Role,
        context: Context,
    ) -> bool;
}

/// 默认策略: 调度器任务通知
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWake;

impl<S: Scheduler> WakeStrategy<S> for NotifyWake {
    #[inline]
    fn wake(
        &self,
        notifier: &WakeupNotifier<S::Task>,
        scheduler: &S,
        role: Role,
        context: Context,
    ) -> bool {
        notifier.wake(scheduler, role, context)
    }
}

/// 核间延迟唤醒策略
///
/// 写入方与读取方运行在不同核心时使用: 本核只记录挂起角色并触发核间中断，
/// 对端核心的中断处理函数通过 [`CrossCoreWake::take_pending`] 取出挂起角色，
/// 再调用缓冲区的 `send_completed_from_isr` / `receive_completed_from_isr`。
///
/// # Example
/// ```ignore
/// static WAKE: CrossCoreWake = CrossCoreWake::new(raise_ipi_to_core1);
///
/// // Core1 核间中断
/// fn ipi_handler() {
///     if WAKE.take_pending(Role::Reader) {
///         let _ = BUFFER.send_completed_from_isr();
///     }
/// }
/// ```
pub struct CrossCoreWake {
    reader_pending: AtomicFlag,
    writer_pending: AtomicFlag,
    raise: fn(),
}

impl CrossCoreWake {
    /// 创建策略，`raise` 用于触发对端核心的中断
    pub const fn new(raise: fn()) -> Self {
        Self {
            reader_pending: AtomicFlag::new(),
            writer_pending: AtomicFlag::new(),
            raise,
        }
    }

    fn flag(&self, role: Role) -> &AtomicFlag {
        match role {
            Role::Writer => &self.writer_pending,
            Role::Reader => &self.reader_pending,
        }
    }

    /// 取出并清除挂起的唤醒请求
    #[inline]
    pub fn take_pending(&self, role: Role) -> bool {
        self.flag(role).take()
    }

    /// 是否有挂起的唤醒请求
    #[inline]
    pub fn is_pending(&self, role: Role) -> bool {
        self.flag(role).is_set()
    }
}

impl<S: Scheduler> WakeStrategy<S> for CrossCoreWake {
    fn wake(
        &self,
        notifier: &WakeupNotifier<S::Task>,
        _scheduler: &S,
        role: Role,
        _context: Context,
    ) -> bool {
        if !notifier.is_waiting(role) {
            return false;
        }

        self.flag(role).set();
        (self.raise)();
        // 唤醒在对端核心完成，本核无需调度
        false
    }
}
