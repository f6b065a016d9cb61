//! 缓冲区配置
//!
//! 定义缓冲区的默认参数与创建配置。

use embassy_time::Duration;

/// 缓冲区创建配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct BufferConfig {
    /// 容量 (字节)，创建后不可改变
    pub capacity: usize,
    /// 唤醒阻塞读取方所需的最少字节数 (仅流缓冲区)，0 视为 1
    pub trigger_level: usize,
}

impl BufferConfig {
    /// 创建默认触发水位的配置
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            trigger_level: DEFAULT_TRIGGER_LEVEL,
        }
    }

    /// 设置触发水位
    pub const fn with_trigger_level(mut self, trigger_level: usize) -> Self {
        self.trigger_level = trigger_level;
        self
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

// ===== 缓冲区默认参数 =====

/// 默认触发水位 (字节)
pub const DEFAULT_TRIGGER_LEVEL: usize = 1;

/// 默认缓冲区容量 (字节)
pub const DEFAULT_BUFFER_SIZE: usize = 256;

/// 消息长度头大小 (字节)，与平台 `usize` 等宽
pub const LENGTH_HEADER_BYTES: usize = core::mem::size_of::<usize>();

// ===== 超时 =====

/// 不等待
pub const NO_WAIT: Duration = Duration::MIN;

/// 永久等待
pub const WAIT_FOREVER: Duration = Duration::MAX;
