//! 流缓冲区与消息缓冲区
//!
//! 两种模式在创建时由类型决定，共享同一个核心实现:
//! - [`StreamBuffer`]: 字节流，允许部分收发，支持触发水位
//! - [`MessageBuffer`]: 离散消息，长度头 + 负载，整条收发
//!
//! # 使用约定
//!
//! 每个缓冲区只允许**一个写入方**和**一个读取方** (任务或中断均可)。
//! 多个写入方或读取方必须由调用者自行串行化，缓冲区不做检测。
//!
//! # 返回值约定
//!
//! 收发返回字节数，0 同时表示"超时 / 无数据 / 目标缓冲区太小"。
//! `*_from_isr` 变体返回 [`IsrOutcome`]，调用者据此决定是否在中断退出时请求调度。

mod channel;
pub mod message;
pub mod stream;

pub use message::MessageBuffer;
pub use stream::StreamBuffer;

use crate::sched::Scheduler;

/// 缓冲区模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Mode {
    /// 字节流
    Stream,
    /// 离散消息
    Message,
}

/// 中断上下文操作结果
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct IsrOutcome {
    /// 实际搬运的字节数 (消息模式为负载长度)
    pub bytes: usize,
    /// 是否唤醒了优先级高于被中断任务的任务
    pub higher_priority_woken: bool,
}

impl IsrOutcome {
    /// 唤醒了更高优先级任务时请求调度 (中断退出前调用)
    #[inline]
    pub fn yield_if_woken<S: Scheduler>(&self, scheduler: &S) -> usize {
        if self.higher_priority_woken {
            scheduler.request_reschedule();
        }
        self.bytes
    }
}
