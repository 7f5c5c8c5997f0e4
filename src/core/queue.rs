use crate::core::PipelineMessage;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// push 失败时原样交还消息
pub enum PushError<M> {
    /// 队列已满（仅非阻塞 push）
    Full(M),
    /// 等待超时（仅 push_timeout）
    Timeout(M),
    /// 队列已关闭
    Closed(M),
}

impl<M> PushError<M> {
    pub fn into_inner(self) -> M {
        match self {
            PushError::Full(m) | PushError::Timeout(m) | PushError::Closed(m) => m,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

impl<M> fmt::Debug for PushError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("PushError::Full(..)"),
            PushError::Timeout(_) => f.write_str("PushError::Timeout(..)"),
            PushError::Closed(_) => f.write_str("PushError::Closed(..)"),
        }
    }
}

struct QueueInner<T> {
    messages: VecDeque<PipelineMessage<T>>,
    capacity: usize,
    closed: bool,
    /// 队列中 Data 消息的数量
    payloads: usize,
}

impl<T> QueueInner<T> {
    fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }
}

/// 有界消息队列 - 线程间唯一的共享可变状态
///
/// - `push` 在队列满时阻塞（背压），`try_push` 不阻塞直接失败
/// - `pop(true)` 阻塞直到有消息，`pop(false)` 队列空时立即返回 None
/// - 严格 FIFO
/// - `clear` 丢弃全部消息并释放负载（seek/close 时防止旧数据越过控制哨兵）
/// - `close` 后 push 失败，阻塞中的 pop 返回 `Closed` 哨兵而不是报错
pub struct MessageQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> MessageQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                messages: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
                payloads: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// 阻塞 push：队列满时等待消费者
    pub fn push(&self, msg: PipelineMessage<T>) -> Result<(), PushError<PipelineMessage<T>>> {
        let mut inner = self.inner.lock();
        while inner.is_full() && !inner.closed {
            self.not_full.wait(&mut inner);
        }
        if inner.closed {
            return Err(PushError::Closed(msg));
        }
        self.enqueue(&mut inner, msg);
        Ok(())
    }

    /// 非阻塞 push
    pub fn try_push(&self, msg: PipelineMessage<T>) -> Result<(), PushError<PipelineMessage<T>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PushError::Closed(msg));
        }
        if inner.is_full() {
            return Err(PushError::Full(msg));
        }
        self.enqueue(&mut inner, msg);
        Ok(())
    }

    /// 最多阻塞 `timeout` 的 push
    pub fn push_timeout(
        &self,
        msg: PipelineMessage<T>,
        timeout: Duration,
    ) -> Result<(), PushError<PipelineMessage<T>>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.is_full() && !inner.closed {
            if self.not_full.wait_until(&mut inner, deadline).timed_out() {
                if inner.is_full() && !inner.closed {
                    return Err(PushError::Timeout(msg));
                }
                break;
            }
        }
        if inner.closed {
            return Err(PushError::Closed(msg));
        }
        self.enqueue(&mut inner, msg);
        Ok(())
    }

    /// 控制消息 push：不受容量限制（哨兵不能被背压卡住），但仍保持 FIFO
    pub fn push_control(&self, msg: PipelineMessage<T>) -> Result<(), PushError<PipelineMessage<T>>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PushError::Closed(msg));
        }
        self.enqueue(&mut inner, msg);
        Ok(())
    }

    /// 取出队首消息
    ///
    /// `block = true` 时阻塞等待；队列已关闭且为空时返回 `Closed` 哨兵
    pub fn pop(&self, block: bool) -> Option<PipelineMessage<T>> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = self.dequeue(&mut inner) {
                return Some(msg);
            }
            if inner.closed {
                return Some(PipelineMessage::Closed);
            }
            if !block {
                return None;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// 最多等待 `timeout` 的 pop，超时返回 None
    pub fn pop_timeout(&self, timeout: Duration) -> Option<PipelineMessage<T>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(msg) = self.dequeue(&mut inner) {
                return Some(msg);
            }
            if inner.closed {
                return Some(PipelineMessage::Closed);
            }
            if self.not_empty.wait_until(&mut inner, deadline).timed_out() {
                return self.dequeue(&mut inner);
            }
        }
    }

    /// 队首满足条件时才取出（不阻塞）
    pub fn pop_if<F>(&self, predicate: F) -> Option<PipelineMessage<T>>
    where
        F: FnOnce(&PipelineMessage<T>) -> bool,
    {
        let mut inner = self.inner.lock();
        match inner.messages.front() {
            Some(front) if predicate(front) => self.dequeue(&mut inner),
            _ => None,
        }
    }

    /// 取出全部消息（调用方可回收负载）
    pub fn drain(&self) -> Vec<PipelineMessage<T>> {
        let mut inner = self.inner.lock();
        inner.payloads = 0;
        let drained: Vec<_> = inner.messages.drain(..).collect();
        self.not_full.notify_all();
        drained
    }

    /// 丢弃全部消息并释放负载，返回丢弃数量
    pub fn clear(&self) -> usize {
        self.drain().len()
    }

    /// 关闭队列，唤醒所有等待中的线程
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// 队列中尚未被消费的负载数量
    pub fn payload_count(&self) -> usize {
        self.inner.lock().payloads
    }

    fn enqueue(&self, inner: &mut QueueInner<T>, msg: PipelineMessage<T>) {
        if msg.is_data() {
            inner.payloads += 1;
        }
        inner.messages.push_back(msg);
        self.not_empty.notify_one();
    }

    fn dequeue(&self, inner: &mut QueueInner<T>) -> Option<PipelineMessage<T>> {
        let msg = inner.messages.pop_front()?;
        if msg.is_data() {
            inner.payloads -= 1;
        }
        self.not_full.notify_one();
        Some(msg)
    }
}
