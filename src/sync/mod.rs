//! 同步原语模块
//!
//! 缓冲区的底层构件:
//! - `BufferRawMutex`: 实例级互斥锁 (中断屏蔽 + 跨核自旋)
//! - `AtomicFlag`: 跨上下文单比特通知
//! - `RingStore`: SPSC 字节环形存储

pub mod primitives;
pub(crate) mod ringbuffer;

pub use primitives::{AtomicFlag, BufferMutex, BufferRawMutex};
