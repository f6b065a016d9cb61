//! 主机模拟调度器
//!
//! 用 std 线程模拟任务:
//! - `HostScheduler::enter(priority)` 把当前线程登记为任务
//! - 未登记的线程视为中断上下文，其 `current_priority` 为 `Priority::IDLE`
//!   (即被中断的是空闲任务)
//! - 任务通知由 `Mutex<bool>` + `Condvar` 实现，通知锁存直到被消费或清除
//!
//! 仅用于测试与主机仿真，不提供真实的优先级抢占。

use std::cell::RefCell;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use embassy_time::{Duration, Instant};

use super::{Priority, Scheduler};

/// 任务控制块
#[derive(Debug)]
struct TaskControl {
    name: &'static str,
    priority: Priority,
    notified: Mutex<bool>,
    signal: Condvar,
}

impl TaskControl {
    fn notified(&self) -> MutexGuard<'_, bool> {
        // 通知状态只是一个 bool，毒化后沿用内部值
        self.notified
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// 主机任务句柄
#[derive(Debug, Clone)]
pub struct HostTask(Arc<TaskControl>);

impl HostTask {
    /// 任务名称
    pub fn name(&self) -> &'static str {
        self.0.name
    }

    /// 任务优先级
    pub fn priority(&self) -> Priority {
        self.0.priority
    }

    /// 是否存在未消费的通知
    pub fn has_pending_notification(&self) -> bool {
        *self.0.notified()
    }
}

impl PartialEq for HostTask {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for HostTask {}

std::thread_local! {
    static CURRENT: RefCell<Option<HostTask>> = const { RefCell::new(None) };
}

/// 基于 std 线程的调度器
#[derive(Debug, Clone, Copy, Default)]
pub struct HostScheduler;

impl HostScheduler {
    /// 创建调度器
    pub const fn new() -> Self {
        Self
    }

    /// 把当前线程登记为任务
    pub fn enter(name: &'static str, priority: Priority) -> HostTask {
        let task = HostTask(Arc::new(TaskControl {
            name,
            priority,
            notified: Mutex::new(false),
            signal: Condvar::new(),
        }));
        CURRENT.with(|current| *current.borrow_mut() = Some(task.clone()));
        task
    }

    /// 当前线程是否已登记为任务
    pub fn in_task() -> bool {
        CURRENT.with(|current| current.borrow().is_some())
    }

    fn current() -> Option<HostTask> {
        CURRENT.with(|current| current.borrow().clone())
    }
}

impl Scheduler for HostScheduler {
    type Task = HostTask;

    fn current_task(&self) -> HostTask {
        // 未登记的线程在首次阻塞时以最低优先级登记
        Self::current().unwrap_or_else(|| Self::enter("anonymous", Priority::IDLE))
    }

    fn current_priority(&self) -> Priority {
        Self::current()
            .map(|task| task.priority())
            .unwrap_or(Priority::IDLE)
    }

    fn task_priority(&self, task: &HostTask) -> Priority {
        task.priority()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn clear_notification(&self) {
        if let Some(task) = Self::current() {
            *task.0.notified() = false;
        }
    }

    fn block_current(&self, timeout: Duration) -> bool {
        let task = self.current_task();
        let control = &task.0;
        let mut notified = control.notified();

        if timeout == Duration::MAX {
            while !*notified {
                notified = control
                    .signal
                    .wait(notified)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        } else {
            let limit = std::time::Duration::from_micros(timeout.as_micros());
            notified = control
                .signal
                .wait_timeout_while(notified, limit, |pending| !*pending)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        // 消费通知
        core::mem::replace(&mut *notified, false)
    }

    fn wake_task(&self, task: &HostTask) {
        *task.0.notified() = true;
        task.0.signal.notify_one();
    }

    fn request_reschedule(&self) {
        thread::yield_now();
    }
}
