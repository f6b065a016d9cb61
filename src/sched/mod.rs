//! 调度器接口
//!
//! 缓冲区不实现调度，只消费外部调度器提供的原语:
//! - 阻塞当前任务 (带超时)
//! - 唤醒指定任务
//! - 优先级比较
//! - 请求重新调度
//!
//! 唤醒基于任务通知: 通知是锁存的，在任务真正阻塞之前送达的通知
//! 会让随后的 `block_current` 立即返回，这是无竞争阻塞协议的前提。
//!
//! 主机上的 [`host::HostScheduler`] 用 std 线程模拟任务，仅用于测试与仿真。

use embassy_time::{Duration, Instant};

#[cfg(any(test, feature = "std"))]
pub mod host;

/// 任务优先级，数值越大优先级越高
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct Priority(pub u8);

impl Priority {
    /// 空闲优先级 (最低)
    pub const IDLE: Self = Self(0);
}

/// 外部调度器能力
///
/// 所有方法都必须可以在缓冲区的互斥窗口内调用 (不得阻塞)，
/// `block_current` 除外: 它只会在互斥窗口之外被调用。
pub trait Scheduler {
    /// 任务句柄
    type Task: Clone + Send;

    /// 当前运行的任务
    fn current_task(&self) -> Self::Task;

    /// 当前运行上下文的优先级
    ///
    /// 在中断中调用时返回被中断任务的优先级
    fn current_priority(&self) -> Priority;

    /// 指定任务的优先级
    fn task_priority(&self, task: &Self::Task) -> Priority;

    /// 当前时间
    fn now(&self) -> Instant;

    /// 清除当前任务的挂起通知 (登记为等待者之前调用)
    fn clear_notification(&self);

    /// 阻塞当前任务直到收到通知或超时
    ///
    /// `Duration::MAX` 表示永久等待。
    ///
    /// # Returns
    /// - `true`: 被通知唤醒
    /// - `false`: 超时
    fn block_current(&self, timeout: Duration) -> bool;

    /// 向任务发送通知 (锁存)，任务阻塞时将其唤醒
    fn wake_task(&self, task: &Self::Task);

    /// 请求一次重新调度 (任务上下文中的 yield)
    fn request_reschedule(&self);
}

/// 超时跟踪
///
/// 阻塞调用可能被多次唤醒后重新检查条件，
/// 每次重新阻塞只等待剩余时间。
#[derive(Debug, Clone, Copy)]
pub struct TimeOut {
    start: Instant,
    wait: Duration,
}

impl TimeOut {
    /// 从 `now` 开始计时
    pub fn start(now: Instant, wait: Duration) -> Self {
        Self { start: now, wait }
    }

    /// 剩余等待时间
    ///
    /// # Returns
    /// - `Some(d)`: 仍可等待 `d`，永久等待始终返回 `Duration::MAX`
    /// - `None`: 已超时
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        if self.wait == Duration::MAX {
            return Some(Duration::MAX);
        }

        let elapsed = now.saturating_duration_since(self.start);
        match self.wait.checked_sub(elapsed) {
            Some(left) if left > Duration::MIN => Some(left),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_zero_expires_immediately() {
        let now = Instant::from_ticks(1_000);
        let timeout = TimeOut::start(now, Duration::MIN);
        assert_eq!(timeout.remaining(now), None);
    }

    #[test]
    fn test_timeout_counts_down() {
        let start = Instant::from_millis(5);
        let timeout = TimeOut::start(start, Duration::from_millis(10));

        assert_eq!(
            timeout.remaining(start + Duration::from_millis(4)),
            Some(Duration::from_millis(6))
        );
        assert_eq!(timeout.remaining(start + Duration::from_millis(10)), None);
        assert_eq!(timeout.remaining(start + Duration::from_millis(50)), None);
    }

    #[test]
    fn test_timeout_forever_never_expires() {
        let start = Instant::from_ticks(0);
        let timeout = TimeOut::start(start, Duration::MAX);
        assert_eq!(
            timeout.remaining(start + Duration::from_secs(3600)),
            Some(Duration::MAX)
        );
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority(2) > Priority::IDLE);
        assert_eq!(Priority::default(), Priority::IDLE);
    }
}
