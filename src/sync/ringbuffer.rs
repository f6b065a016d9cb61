//! 字节环形存储 (RingStore)
//!
//! 单生产者单消费者 (SPSC) 的定长字节存储，是流缓冲区与消息缓冲区的底层:
//! - 写入方独占 `head`，读取方独占 `tail`
//! - `used` 是唯一跨上下文共享的计数器，写方只增、读方只减
//! - 支持回绕读写与部分读写
//! - 两阶段提交: 先拷贝 (`write_at` / `peek_at`)，后提交 (`commit_*`)，
//!   未提交的字节对另一方不可见
//!
//! 存储可以来自堆 (`alloc`)，也可以由调用者提供 (`&mut [u8]`)。

use core::marker::PhantomData;
use core::ptr::{self, NonNull};
use portable_atomic::{AtomicUsize, Ordering};

#[cfg(any(test, feature = "alloc"))]
use alloc::{boxed::Box, vec::Vec};

use crate::error::Error;

/// 定长字节环形存储
///
/// # Concurrency
/// 只允许一个写入方与一个读取方。写入方法 (`write`/`write_at`/`commit_write`)
/// 只能由写入方调用，读取方法 (`read`/`peek_at`/`commit_read`) 只能由读取方调用。
/// 违反该约定不会被检测。
pub(crate) struct RingStore<'a> {
    /// 存储起始地址
    storage: NonNull<u8>,
    /// 存储大小 (即容量)
    size: usize,
    /// 存储是否由本结构从堆上分配
    owned: bool,
    /// 写入位置 (写入方更新)，范围 `[0, size)`
    head: AtomicUsize,
    /// 读取位置 (读取方更新)，范围 `[0, size)`
    tail: AtomicUsize,
    /// 已用字节数，区分 head == tail 时的空与满
    used: AtomicUsize,
    _marker: PhantomData<&'a mut [u8]>,
}

// Safety: 写入方与读取方访问的字节区间互不重叠，
// 区间归属通过 `used` 的 Release/Acquire 转移
unsafe impl Send for RingStore<'_> {}
unsafe impl Sync for RingStore<'_> {}

impl<'a> RingStore<'a> {
    /// 使用调用者提供的存储
    ///
    /// 存储必须非空。
    pub fn with_storage(storage: &'a mut [u8]) -> Result<Self, Error> {
        if storage.is_empty() {
            return Err(Error::ZeroCapacity);
        }

        let size = storage.len();
        Ok(Self {
            storage: NonNull::from(storage).cast(),
            size,
            owned: false,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            used: AtomicUsize::new(0),
            _marker: PhantomData,
        })
    }

    /// 缓冲区容量
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// 当前已用字节数
    #[inline(always)]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// 剩余可写字节数
    #[inline(always)]
    pub fn free_space(&self) -> usize {
        self.size - self.used()
    }

    /// 存储是否由调用者提供
    #[inline(always)]
    pub fn is_static(&self) -> bool {
        !self.owned
    }

    /// 回绕索引 (idx < 2 * size)
    #[inline(always)]
    fn wrap(&self, idx: usize) -> usize {
        if idx >= self.size {
            idx - self.size
        } else {
            idx
        }
    }

    // ===== 写入方 =====

    /// 批量写入数据
    ///
    /// # Returns
    /// 实际写入的字节数，空间不足时部分写入
    pub fn write(&self, data: &[u8]) -> usize {
        let len = data.len().min(self.free_space());
        if len == 0 {
            return 0;
        }

        self.write_at(0, &data[..len]);
        self.commit_write(len);
        len
    }

    /// 从 `head + offset` 开始拷贝数据，不提交
    ///
    /// 调用者保证 `offset + data.len() <= free_space()`
    pub(crate) fn write_at(&self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.free_space());

        let head = self.head.load(Ordering::Relaxed);
        self.copy_in(self.wrap(head + offset), data);
    }

    /// 提交写入，`len` 字节对读取方可见
    #[inline]
    pub(crate) fn commit_write(&self, len: usize) {
        let head = self.head.load(Ordering::Relaxed);
        self.head.store(self.wrap(head + len), Ordering::Relaxed);
        self.used.fetch_add(len, Ordering::Release);
    }

    // ===== 读取方 =====

    /// 批量读取数据
    ///
    /// # Returns
    /// 实际读取的字节数，数据不足时部分读取
    pub fn read(&self, out: &mut [u8]) -> usize {
        let len = out.len().min(self.used());
        if len == 0 {
            return 0;
        }

        self.peek_at(0, &mut out[..len]);
        self.commit_read(len);
        len
    }

    /// 从 `tail + offset` 开始拷贝数据，不消费
    ///
    /// 调用者保证 `offset + out.len() <= used()`
    pub(crate) fn peek_at(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.used());

        let tail = self.tail.load(Ordering::Relaxed);
        self.copy_out(self.wrap(tail + offset), out);
    }

    /// 提交读取，释放 `len` 字节空间给写入方
    #[inline]
    pub(crate) fn commit_read(&self, len: usize) {
        let tail = self.tail.load(Ordering::Relaxed);
        self.tail.store(self.wrap(tail + len), Ordering::Relaxed);
        self.used.fetch_sub(len, Ordering::Release);
    }

    /// 清空存储
    ///
    /// 调用时双方都不得处于操作中
    pub fn reset(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.used.store(0, Ordering::Release);
    }

    // ===== 回绕拷贝 =====

    fn copy_in(&self, start: usize, data: &[u8]) {
        let first = (self.size - start).min(data.len());
        let base = self.storage.as_ptr();

        // Safety: start < size，两段拷贝均落在存储范围内，
        // 且属于写入方独占的空闲区间
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), base.add(start), first);
            ptr::copy_nonoverlapping(data.as_ptr().add(first), base, data.len() - first);
        }
    }

    fn copy_out(&self, start: usize, out: &mut [u8]) {
        let first = (self.size - start).min(out.len());
        let base = self.storage.as_ptr();

        // Safety: start < size，两段拷贝均落在存储范围内，
        // 且属于读取方独占的已提交区间
        unsafe {
            ptr::copy_nonoverlapping(base.add(start), out.as_mut_ptr(), first);
            ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), out.len() - first);
        }
    }
}

#[cfg(any(test, feature = "alloc"))]
impl RingStore<'static> {
    /// 从堆上分配 `capacity` 字节存储
    ///
    /// 分配失败返回 [`Error::AllocFailed`]，不会 panic
    pub fn allocate(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::ZeroCapacity);
        }

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity)
            .map_err(|_| Error::AllocFailed)?;
        bytes.resize(capacity, 0);

        let raw = Box::into_raw(bytes.into_boxed_slice());
        // Safety: Box::into_raw 永远返回非空指针
        let storage = unsafe { NonNull::new_unchecked(raw as *mut u8) };

        Ok(Self {
            storage,
            size: capacity,
            owned: true,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            used: AtomicUsize::new(0),
            _marker: PhantomData,
        })
    }
}

impl Drop for RingStore<'_> {
    fn drop(&mut self) {
        #[cfg(any(test, feature = "alloc"))]
        if self.owned {
            // Safety: owned 存储来自 allocate() 中的 Box<[u8]>，大小为 size
            unsafe {
                let slice = ptr::slice_from_raw_parts_mut(self.storage.as_ptr(), self.size);
                drop(Box::from_raw(slice));
            }
        }
    }
}
