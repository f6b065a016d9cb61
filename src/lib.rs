//! RustRTOS 流缓冲区 / 消息缓冲区库
//!
//! 本库提供以下核心功能:
//! - 单写单读字节流缓冲区 (部分收发、触发水位)
//! - 长度头分帧的消息缓冲区 (整条收发)
//! - 任务 / 中断双上下文 API，可选超时阻塞
//! - 可替换的唤醒策略 (默认任务通知，可选跨核延迟唤醒)
//! - 条件编译日志系统
//!
//! 调度器通过 [`Scheduler`] 接入，`std` 特性下提供基于线程的宿主机实现。

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(any(test, feature = "alloc"))]
extern crate alloc;

pub mod util;
pub mod sync;
pub mod sched;
pub mod notify;
pub mod error;
pub mod config;
pub mod buffer;

// ===== 重导出常用类型 =====
pub use buffer::{IsrOutcome, MessageBuffer, Mode, StreamBuffer};
pub use config::BufferConfig;
pub use error::Error;
pub use notify::{Context, CrossCoreWake, NotifyWake, Role, WakeStrategy};
pub use sched::{Priority, Scheduler};

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
