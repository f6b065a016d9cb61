//! 消息缓冲区 (MessageFramer)
//!
//! 在流缓冲区核心之上传递离散的变长消息。每条记录由定宽长度头与负载组成:
//!
//! ```text
//! +------------------------+-------------------+
//! | 长度 (usize, 本机字节序) | 负载 (长度字节)     |
//! +------------------------+-------------------+
//! ```
//!
//! - 长度头宽度为 [`LENGTH_HEADER_BYTES`]，写入 10 字节消息实际占用 10 + 头 字节
//! - 发送整条提交，读取方永远看不到半条记录
//! - 接收缓冲区太小时返回 0 且不消费记录，可用 [`MessageBuffer::next_message_len`]
//!   查询长度后重试
//! - 消息加长度头超过容量时立即返回 0，永远不会阻塞

use embassy_time::Duration;

use crate::config::{BufferConfig, LENGTH_HEADER_BYTES};
use crate::error::Error;
use crate::notify::{Context, NotifyWake, WakeStrategy};
use crate::sched::Scheduler;
use crate::sync::ringbuffer::RingStore;
use crate::util::log::*;

use super::channel::{BufferCore, Transfer};
use super::{IsrOutcome, Mode};

/// 离散消息缓冲区
pub struct MessageBuffer<'a, S: Scheduler, W = NotifyWake> {
    core: BufferCore<'a, S, W>,
}

#[cfg(any(test, feature = "alloc"))]
impl<S: Scheduler> MessageBuffer<'static, S, NotifyWake> {
    /// 从堆上分配存储并创建
    pub fn create(config: BufferConfig, scheduler: S) -> Result<Self, Error> {
        Self::create_with_wake(config, None, scheduler, NotifyWake)
    }
}

impl<'a, S: Scheduler> MessageBuffer<'a, S, NotifyWake> {
    /// 使用调用者提供的存储创建 (不分配)
    pub fn create_static(
        config: BufferConfig,
        storage: &'a mut [u8],
        scheduler: S,
    ) -> Result<Self, Error> {
        Self::create_with_wake(config, Some(storage), scheduler, NotifyWake)
    }
}

impl<'a, S, W> MessageBuffer<'a, S, W>
where
    S: Scheduler,
    W: WakeStrategy<S>,
{
    /// 通用创建: 可选存储 + 自定义唤醒策略
    ///
    /// 容量必须大于长度头。消息缓冲区的触发水位固定为 1 (整条消息到达即唤醒)，
    /// `config.trigger_level` 被忽略。
    pub fn create_with_wake(
        config: BufferConfig,
        storage: Option<&'a mut [u8]>,
        scheduler: S,
        wake: W,
    ) -> Result<Self, Error> {
        let config = config.with_trigger_level(1);
        Ok(Self {
            core: BufferCore::new(&config, storage, LENGTH_HEADER_BYTES, scheduler, wake)?,
        })
    }

    /// 单条消息的最大负载
    pub fn max_message_len(&self) -> usize {
        self.core.capacity() - LENGTH_HEADER_BYTES
    }

    /// 发送一条消息
    ///
    /// 空间不足且 `timeout` 非 0 时阻塞，直到整条记录可以写入。
    ///
    /// # Returns
    /// 成功返回消息长度；超时或消息永远放不下时返回 0
    pub fn send(&self, message: &[u8], timeout: Duration) -> usize {
        if message.len() > self.max_message_len() {
            log_warn!(
                "message of {} bytes exceeds capacity {}",
                message.len(),
                self.core.capacity()
            );
            return 0;
        }

        let required = LENGTH_HEADER_BYTES + message.len();
        self.core
            .send_with(required, timeout, |store| write_record(store, message))
            .bytes
    }

    /// 中断上下文发送一条消息，从不阻塞
    pub fn send_from_isr(&self, message: &[u8]) -> IsrOutcome {
        if message.len() > self.max_message_len() {
            return IsrOutcome::default();
        }
        self.core
            .send_from_isr_with(|store| write_record(store, message))
    }

    /// 接收一条消息
    ///
    /// 没有消息且 `timeout` 非 0 时阻塞。
    ///
    /// # Returns
    /// 消息长度；超时、无消息或 `out` 放不下下一条消息时返回 0 (记录保留)
    pub fn receive(&self, out: &mut [u8], timeout: Duration) -> usize {
        self.core
            .receive_with(LENGTH_HEADER_BYTES, timeout, |store| read_record(store, out))
            .bytes
    }

    /// 中断上下文接收一条消息，从不阻塞
    pub fn receive_from_isr(&self, out: &mut [u8]) -> IsrOutcome {
        self.core
            .receive_from_isr_with(|store| read_record(store, out))
    }

    /// 下一条消息的长度 (不消费)，无消息时为 0
    ///
    /// 只能由读取方调用
    pub fn next_message_len(&self) -> usize {
        peek_length(self.core.store()).unwrap_or(0)
    }

    /// 复位为空
    ///
    /// 有任务阻塞在本缓冲区上时返回 [`Error::BufferBusy`]，状态不变。
    pub fn reset(&self) -> Result<(), Error> {
        self.core.reset(Context::Task)
    }

    /// 中断上下文复位
    pub fn reset_from_isr(&self) -> Result<(), Error> {
        self.core.reset(Context::Isr)
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

    /// 缓冲区容量 (包含长度头占用)
    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    /// 剩余空间 (字节，包含下一条记录的长度头)
    pub fn space_available(&self) -> usize {
        self.core.space_available()
    }

    /// 已用字节数 (包含长度头)
    pub fn bytes_available(&self) -> usize {
        self.core.bytes_available()
    }

    /// 是否已满: 剩余空间放不下最小的非空记录 (长度头 + 1 字节)
    pub fn is_full(&self) -> bool {
        self.core.space_available() < LENGTH_HEADER_BYTES + 1
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.core.bytes_available() == 0
    }

    /// 缓冲区模式
    pub const fn mode(&self) -> Mode {
        Mode::Message
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

// ===== 记录编解码 =====

/// 写入整条记录，空间不足时不写任何字节
fn write_record(store: &RingStore<'_>, message: &[u8]) -> Transfer {
    let required = LENGTH_HEADER_BYTES + message.len();
    if store.free_space() < required {
        return Transfer::NONE;
    }

    store.write_at(0, &message.len().to_ne_bytes());
    store.write_at(LENGTH_HEADER_BYTES, message);
    // 长度头与负载一次提交
    store.commit_write(required);

    Transfer {
        bytes: message.len(),
        moved: required,
    }
}

/// 读取整条记录，`out` 放不下时不消费
fn read_record(store: &RingStore<'_>, out: &mut [u8]) -> Transfer {
    let Some(len) = peek_length(store) else {
        return Transfer::NONE;
    };
    if out.len() < len {
        return Transfer::NONE;
    }

    store.peek_at(LENGTH_HEADER_BYTES, &mut out[..len]);
    store.commit_read(LENGTH_HEADER_BYTES + len);

    Transfer {
        bytes: len,
        moved: LENGTH_HEADER_BYTES + len,
    }
}

fn peek_length(store: &RingStore<'_>) -> Option<usize> {
    if store.used() < LENGTH_HEADER_BYTES {
        return None;
    }

    let mut header = [0u8; LENGTH_HEADER_BYTES];
    store.peek_at(0, &mut header);
    Some(usize::from_ne_bytes(header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NO_WAIT, WAIT_FOREVER};
    use crate::notify::{CrossCoreWake, Role};
    use crate::sched::host::HostScheduler;
    use crate::sched::Priority;
    use core::sync::atomic::{AtomicUsize, Ordering};
    use embassy_time::Instant;
    use std::thread;
    use std::vec;
    use std::vec::Vec;

    fn message_buffer(capacity: usize) -> MessageBuffer<'static, HostScheduler> {
        MessageBuffer::create(BufferConfig::new(capacity), HostScheduler).unwrap()
    }

    fn wait_until_blocked<W: WakeStrategy<HostScheduler>>(
        buffer: &MessageBuffer<'_, HostScheduler, W>,
        role: Role,
    ) {
        let start = Instant::now();
        while !buffer.core.is_waiting(role) {
            assert!(start.elapsed() < Duration::from_secs(5), "peer never blocked");
            thread::yield_now();
        }
    }

    #[test]
    fn test_fullness_scenario() {
        // 10 字节消息之后只剩 2 字节
        let buffer = message_buffer(10 + LENGTH_HEADER_BYTES + 2);
        let message: Vec<u8> = (1..=10).collect();

        assert_eq!(buffer.send(&message, NO_WAIT), 10);
        assert!(buffer.is_full());
        assert_eq!(buffer.space_available(), 2);
        assert_eq!(buffer.send(&[0xEE], NO_WAIT), 0);

        let mut out = [0u8; 16];
        assert_eq!(buffer.receive(&mut out, NO_WAIT), 10);
        assert_eq!(&out[..10], &message[..]);
        assert!(!buffer.is_full());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_is_full_threshold() {
        let buffer = message_buffer(LENGTH_HEADER_BYTES * 3);

        // 剩余空间恰好为 头 + 1: 未满
        let payload = vec![0u8; LENGTH_HEADER_BYTES - 1];
        assert_eq!(buffer.send(&payload, NO_WAIT), payload.len());
        assert_eq!(buffer.space_available(), LENGTH_HEADER_BYTES + 1);
        assert!(!buffer.is_full());

        assert_eq!(buffer.send(&[1], NO_WAIT), 1);
        assert_eq!(buffer.space_available(), 0);
        assert!(buffer.is_full());
    }

    #[test]
    fn test_small_destination_keeps_message() {
        let buffer = message_buffer(64);
        assert_eq!(buffer.send(b"hello world", NO_WAIT), 11);
        let used = buffer.bytes_available();

        let mut small = [0u8; 4];
        assert_eq!(buffer.receive(&mut small, NO_WAIT), 0);
        assert_eq!(buffer.bytes_available(), used);

        let isr = buffer.receive_from_isr(&mut small);
        assert_eq!(isr, IsrOutcome::default());

        assert_eq!(buffer.next_message_len(), 11);
        let mut out = vec![0u8; buffer.next_message_len()];
        assert_eq!(buffer.receive(&mut out, NO_WAIT), 11);
        assert_eq!(&out[..], b"hello world");
        assert_eq!(buffer.next_message_len(), 0);
    }

    #[test]
    fn test_oversized_message_never_blocks() {
        let buffer = message_buffer(16);
        assert_eq!(buffer.max_message_len(), 16 - LENGTH_HEADER_BYTES);

        let oversized = vec![0u8; buffer.max_message_len() + 1];
        let start = Instant::now();
        assert_eq!(buffer.send(&oversized, WAIT_FOREVER), 0);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(buffer.send_from_isr(&oversized).bytes, 0);
        assert!(buffer.is_empty());

        // 恰好填满容量的消息可以发送
        let exact = vec![7u8; buffer.max_message_len()];
        assert_eq!(buffer.send(&exact, NO_WAIT), exact.len());
    }

    #[test]
    fn test_messages_wrap_around_storage() {
        let buffer = message_buffer(LENGTH_HEADER_BYTES * 2 + 6);
        let mut out = [0u8; 8];

        for round in 0..10u8 {
            let message = [round, round + 1, round + 2];
            assert_eq!(buffer.send(&message, NO_WAIT), 3);
            assert_eq!(buffer.send(&message[..2], NO_WAIT), 2);
            assert!(buffer.is_full());

            assert_eq!(buffer.receive(&mut out, NO_WAIT), 3);
            assert_eq!(&out[..3], &message);
            assert_eq!(buffer.receive(&mut out, NO_WAIT), 2);
            assert_eq!(&out[..2], &message[..2]);
        }
    }

    #[test]
    fn test_zero_length_message() {
        let buffer = message_buffer(32);
        assert_eq!(buffer.send(&[], NO_WAIT), 0);
        assert_eq!(buffer.bytes_available(), LENGTH_HEADER_BYTES);
        assert_eq!(buffer.next_message_len(), 0);

        let mut out = [0u8; 4];
        assert_eq!(buffer.receive(&mut out, NO_WAIT), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_creation_rejects_tiny_capacity() {
        let result = MessageBuffer::create(BufferConfig::new(LENGTH_HEADER_BYTES), HostScheduler);
        assert_eq!(result.err(), Some(Error::CapacityTooSmall));

        let mut storage = [0u8; LENGTH_HEADER_BYTES + 1];
        assert!(MessageBuffer::create_static(
            BufferConfig::new(LENGTH_HEADER_BYTES + 1),
            &mut storage,
            HostScheduler
        )
        .is_ok());
    }

    #[test]
    fn test_reset_guard() {
        let buffer = message_buffer(32);
        assert_eq!(buffer.send(b"abc", NO_WAIT), 3);

        thread::scope(|s| {
            let writer = s.spawn(|| {
                HostScheduler::enter("writer", Priority(1));
                let big = [0u8; 20];
                buffer.send(&big, WAIT_FOREVER)
            });

            wait_until_blocked(&buffer, Role::Writer);

            assert_eq!(buffer.reset(), Err(Error::BufferBusy));
            assert_eq!(buffer.next_message_len(), 3);

            // 读出 "abc" 后空间足够，写入方被唤醒
            let mut out = [0u8; 8];
            let got = buffer.receive_from_isr(&mut out);
            assert_eq!(got.bytes, 3);
            assert!(got.higher_priority_woken);
            assert_eq!(writer.join().unwrap(), 20);
        });

        assert_eq!(buffer.reset(), Ok(()));
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_message_len(), 0);
    }

    #[test]
    fn test_message_fifo_across_threads() {
        const COUNT: usize = 500;
        let buffer = message_buffer(LENGTH_HEADER_BYTES * 3 + 24);
        let expected = |i: usize| -> Vec<u8> { (0..=i % 13).map(|j| (i + j) as u8).collect() };

        let received = thread::scope(|s| {
            s.spawn(|| {
                HostScheduler::enter("writer", Priority(1));
                for i in 0..COUNT {
                    let message = expected(i);
                    assert_eq!(buffer.send(&message, WAIT_FOREVER), message.len());
                }
            });

            let reader = s.spawn(|| {
                HostScheduler::enter("reader", Priority(2));
                let mut received = Vec::with_capacity(COUNT);
                let mut out = [0u8; 16];
                for _ in 0..COUNT {
                    let n = buffer.receive(&mut out, Duration::from_secs(5));
                    assert!(n > 0, "writer stalled");
                    received.push(out[..n].to_vec());
                }
                received
            });

            reader.join().unwrap()
        });

        for (i, message) in received.iter().enumerate() {
            assert_eq!(message, &expected(i));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_send_timeout_deregisters_writer() {
        let buffer = message_buffer(LENGTH_HEADER_BYTES + 8);
        assert_eq!(buffer.send(&[1; 6], NO_WAIT), 6);

        thread::scope(|s| {
            s.spawn(|| {
                HostScheduler::enter("writer", Priority(1));
                let start = Instant::now();
                // 整条记录放不下，部分空间不会被使用
                assert_eq!(buffer.send(&[2; 4], Duration::from_millis(20)), 0);
                assert!(start.elapsed() >= Duration::from_millis(20));
            });
        });

        assert!(!buffer.core.is_waiting(Role::Writer));
        assert_eq!(buffer.bytes_available(), LENGTH_HEADER_BYTES + 6);
        assert_eq!(buffer.reset(), Ok(()));
    }

    static IPI_RAISED: AtomicUsize = AtomicUsize::new(0);

    fn raise_ipi() {
        IPI_RAISED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_receive_completed_from_isr_wakes_writer() {
        let buffer = MessageBuffer::create_with_wake(
            BufferConfig::new(LENGTH_HEADER_BYTES * 2 + 8),
            None,
            HostScheduler,
            CrossCoreWake::new(raise_ipi),
        )
        .unwrap();
        assert_eq!(buffer.send(b"abcd", NO_WAIT), 4);
        assert_eq!(buffer.send(b"efgh", NO_WAIT), 4);
        assert!(buffer.is_full());

        // 无等待者时直接完成唤醒不产生效果
        assert!(!buffer.receive_completed_from_isr());

        thread::scope(|s| {
            let writer = s.spawn(|| {
                HostScheduler::enter("core0-writer", Priority(2));
                buffer.send(b"ijkl", Duration::from_secs(5))
            });

            wait_until_blocked(&buffer, Role::Writer);
            let before = IPI_RAISED.load(Ordering::SeqCst);

            let mut out = [0u8; 4];
            let outcome = buffer.receive_from_isr(&mut out);
            assert_eq!(outcome.bytes, 4);
            assert_eq!(&out, b"abcd");
            assert!(!outcome.higher_priority_woken);
            assert_eq!(IPI_RAISED.load(Ordering::SeqCst), before + 1);
            assert!(buffer.core.is_waiting(Role::Writer));

            // 对端核心完成唤醒
            assert!(buffer.wake_strategy().take_pending(Role::Writer));
            assert!(buffer.receive_completed_from_isr());
            assert_eq!(writer.join().unwrap(), 4);
        });

        let mut out = [0u8; 4];
        assert_eq!(buffer.receive(&mut out, NO_WAIT), 4);
        assert_eq!(&out, b"efgh");
        assert_eq!(buffer.receive(&mut out, NO_WAIT), 4);
        assert_eq!(&out, b"ijkl");
    }
}
