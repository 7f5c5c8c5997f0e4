use crossbeam::queue::SegQueue;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

/// 按形状分组的缓冲池（每个解码线程私有）
///
/// 消费者用完的缓冲通过 `BufferRecycler` 推入无锁回收队列，
/// 解码线程下次 `acquire` 时再把它们收回空闲列表，不需要共享锁。
pub struct BufferPool<K, T> {
    free: HashMap<K, Vec<Vec<T>>>,
    returns: Arc<SegQueue<(K, Vec<T>)>>,
    max_per_shape: usize,
    allocations: u64,
    reuses: u64,
}

/// 缓冲回收端（可跨线程）
pub struct BufferRecycler<K, T> {
    returns: Arc<SegQueue<(K, Vec<T>)>>,
}

impl<K, T> Clone for BufferRecycler<K, T> {
    fn clone(&self) -> Self {
        Self {
            returns: self.returns.clone(),
        }
    }
}

impl<K, T> BufferRecycler<K, T> {
    pub fn recycle(&self, shape: K, buffer: Vec<T>) {
        self.returns.push((shape, buffer));
    }

    /// 等待解码线程收回的缓冲数量
    pub fn pending(&self) -> usize {
        self.returns.len()
    }
}

impl<K, T> BufferPool<K, T>
where
    K: Copy + Eq + Hash,
    T: Clone + Default,
{
    pub fn new(max_per_shape: usize) -> Self {
        Self {
            free: HashMap::new(),
            returns: Arc::new(SegQueue::new()),
            max_per_shape,
            allocations: 0,
            reuses: 0,
        }
    }

    pub fn recycler(&self) -> BufferRecycler<K, T> {
        BufferRecycler {
            returns: self.returns.clone(),
        }
    }

    /// 取一块长度为 `len` 的缓冲，内容未定义（调用方负责覆盖）
    pub fn acquire(&mut self, shape: K, len: usize) -> Vec<T> {
        self.collect_returns();
        match self.free.get_mut(&shape).and_then(|list| list.pop()) {
            Some(mut buffer) => {
                self.reuses += 1;
                buffer.resize(len, T::default());
                buffer
            }
            None => {
                self.allocations += 1;
                vec![T::default(); len]
            }
        }
    }

    /// 取一块全部为默认值的缓冲（音频静音、黑帧）
    pub fn acquire_zeroed(&mut self, shape: K, len: usize) -> Vec<T> {
        let mut buffer = self.acquire(shape, len);
        buffer.iter_mut().for_each(|v| *v = T::default());
        buffer
    }

    /// 解码线程内部丢弃的缓冲直接归还
    pub fn release(&mut self, shape: K, buffer: Vec<T>) {
        let list = self.free.entry(shape).or_default();
        if list.len() < self.max_per_shape {
            list.push(buffer);
        }
    }

    /// 收回消费者归还的缓冲
    pub fn collect_returns(&mut self) {
        while let Some((shape, buffer)) = self.returns.pop() {
            self.release(shape, buffer);
        }
    }

    pub fn pooled(&self, shape: &K) -> usize {
        self.free.get(shape).map(|list| list.len()).unwrap_or(0)
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn reuses(&self) -> u64 {
        self.reuses
    }
}
