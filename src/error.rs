//! 缓冲区错误
//!
//! 只有创建、复位与配置会返回错误。收发操作的"超时 / 无数据 / 目标缓冲区太小"
//! 统一以返回 0 字节表示，调用者通过辅助查询区分。

use core::fmt;

/// 缓冲区错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Error {
    /// 容量为 0
    ZeroCapacity,
    /// 消息缓冲区容量不大于长度头
    CapacityTooSmall,
    /// 触发水位超过容量
    TriggerLevelTooHigh,
    /// 未提供存储且堆分配不可用
    StorageMissing,
    /// 提供的存储小于容量
    StorageTooSmall,
    /// 堆分配失败
    AllocFailed,
    /// 存在阻塞中的等待者，拒绝复位
    BufferBusy,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::ZeroCapacity => "buffer capacity is zero",
            Error::CapacityTooSmall => "capacity cannot hold a message length header",
            Error::TriggerLevelTooHigh => "trigger level exceeds buffer capacity",
            Error::StorageMissing => "no storage supplied and heap allocation unavailable",
            Error::StorageTooSmall => "supplied storage is smaller than the capacity",
            Error::AllocFailed => "storage allocation failed",
            Error::BufferBusy => "a task is blocked on the buffer",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}
