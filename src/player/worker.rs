use crate::core::{log_ctx, DecodeState, MessageQueue, Packet, PipelineMessage, PlayerError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 解码线程命令（在两次解码之间被取出执行）
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    /// 宣告一次新的 seek：丢弃输入直到对应序号的 SeekDone 哨兵
    Seek { seq: u64 },
    /// 设置标称帧率，0 表示恢复信任容器时间戳
    SetFrameRate(f64),
    Close,
}

/// seek 期间对一个解码输出的判定
pub enum SeekResolution<O> {
    /// 早于目标，丢弃（继续解码）
    Discard,
    /// 到达目标：先发 SeekDone(achieved)，再发这些输出
    Done { achieved: f64, outputs: Vec<O> },
}

/// 单条流的解码逻辑（视频/音频各一个实现）
///
/// 所有方法都只在解码线程上调用
pub trait StreamProcessor: Send + 'static {
    type Output: Send + 'static;

    fn label(&self) -> &'static str;

    /// 解码一个包并给输出打上显示时间
    fn decode(&mut self, packet: &Packet) -> Result<Option<Self::Output>>;

    /// 取出同一个包解出的下一个输出（一个包可能解出多帧）
    fn receive(&mut self) -> Result<Option<Self::Output>> {
        Ok(None)
    }

    /// 没有新输入时取出一个缓冲中的输出
    fn flush(&mut self) -> Result<Option<Self::Output>>;

    /// 丢弃解码器内部状态；`anchor` 是 seek 目标（没有时间戳的第一帧用它）
    fn reset(&mut self, anchor: Option<f64>);

    fn resolve_seek(&mut self, target: f64, output: Self::Output) -> SeekResolution<Self::Output>;

    /// 丢弃一个不会发出去的输出（归还缓冲）
    fn discard(&mut self, _output: Self::Output) {}

    fn set_nominal_frame_rate(&mut self, _fps: Option<f64>) {}
}

/// 解码线程统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub packets: u64,
    pub decoded: u64,
    pub emitted: u64,
    /// seek 期间丢弃的输出
    pub discarded: u64,
    /// 过期的数据包/哨兵
    pub stale_dropped: u64,
    pub decode_errors: u64,
    pub seeks: u64,
}

struct PendingSeek {
    seq: u64,
    target: f64,
}

/// 解码线程：输入队列 → StreamProcessor → 输出队列
pub struct DecoderWorker<P: StreamProcessor> {
    processor: P,
    input: Arc<MessageQueue<Packet>>,
    output: Arc<MessageQueue<P::Output>>,
    commands: Receiver<WorkerCommand>,
    /// 输入队列为空时检查命令的间隔
    poll_interval: Duration,
    state: DecodeState,
    seek: Option<PendingSeek>,
    /// 最新宣告的 seek 序号
    announced_seq: u64,
    /// 最新收到的（未过期的）SeekDone 序号
    accepted_seq: u64,
    /// EndOfStream 已发出，不再读取输入
    drained: bool,
    degraded_after: u32,
    consecutive_errors: u32,
    degraded_reported: bool,
    stats: WorkerStats,
}

impl<P: StreamProcessor> DecoderWorker<P> {
    pub fn new(
        processor: P,
        input: Arc<MessageQueue<Packet>>,
        output: Arc<MessageQueue<P::Output>>,
        commands: Receiver<WorkerCommand>,
        degraded_after: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            processor,
            input,
            output,
            commands,
            poll_interval,
            state: DecodeState::Decoding,
            seek: None,
            announced_seq: 0,
            accepted_seq: 0,
            drained: false,
            degraded_after: degraded_after.max(1),
            consecutive_errors: 0,
            degraded_reported: false,
            stats: WorkerStats::default(),
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// 解码循环，返回统计信息
    ///
    /// 命令在两条输入消息之间执行；输入为空时每隔 `poll_interval` 检查一次命令
    pub fn run(mut self) -> WorkerStats {
        let label = self.processor.label();
        info!("{} 🎞 {} 解码线程启动", log_ctx(), label);

        while self.state != DecodeState::Closed {
            if self.drained {
                // 排空后只等命令（seek 或 close）
                match self.commands.recv() {
                    Ok(cmd) => self.handle_command(cmd),
                    Err(_) => self.state = DecodeState::Closed,
                }
                continue;
            }

            let msg = self.input.pop_timeout(self.poll_interval);
            self.drain_commands();
            if self.state == DecodeState::Closed {
                break;
            }
            if let Some(msg) = msg {
                self.handle_message(msg);
            }
        }

        let _ = self.output.push_control(PipelineMessage::Closed);
        info!(
            "{} 🛑 {} 解码线程退出: {:?}",
            log_ctx(),
            label,
            self.stats
        );
        self.stats
    }

    fn drain_commands(&mut self) {
        while let Ok(cmd) = self.commands.try_recv() {
            self.handle_command(cmd);
            if self.state == DecodeState::Closed {
                return;
            }
        }
    }

    fn handle_command(&mut self, cmd: WorkerCommand) {
        match cmd {
            WorkerCommand::Seek { seq } => {
                if seq <= self.announced_seq {
                    return;
                }
                debug!("{} {} 收到 seek #{} 宣告", log_ctx(), self.processor.label(), seq);
                self.announced_seq = seq;
                self.seek = None;
                self.drained = false;
                self.state = DecodeState::Decoding;
                self.processor.reset(None);
            }
            WorkerCommand::SetFrameRate(fps) => {
                let fps = if fps > 0.0 { Some(fps) } else { None };
                self.processor.set_nominal_frame_rate(fps);
            }
            WorkerCommand::Close => {
                debug!("{} {} 收到关闭命令", log_ctx(), self.processor.label());
                self.state = DecodeState::Closed;
            }
        }
    }

    /// 是否在等待已宣告 seek 的哨兵（期间的输入都是旧数据）
    fn awaiting_sentinel(&self) -> bool {
        self.announced_seq > self.accepted_seq
    }

    fn handle_message(&mut self, msg: PipelineMessage<Packet>) {
        match msg {
            PipelineMessage::Closed => {
                self.state = DecodeState::Closed;
            }
            PipelineMessage::SeekDone { seq, time } => {
                if seq < self.announced_seq || (seq <= self.accepted_seq && self.accepted_seq > 0) {
                    debug!(
                        "{} {} 丢弃过期的 SeekDone #{}（最新 #{}）",
                        log_ctx(),
                        self.processor.label(),
                        seq,
                        self.announced_seq
                    );
                    self.stats.stale_dropped += 1;
                    return;
                }
                self.announced_seq = seq;
                self.accepted_seq = seq;
                self.stats.seeks += 1;
                self.processor.reset(Some(time));
                self.seek = Some(PendingSeek { seq, target: time });
                self.state = DecodeState::SeekPending;
            }
            _ if self.awaiting_sentinel() => {
                self.stats.stale_dropped += 1;
            }
            PipelineMessage::Data(packet) => {
                self.stats.packets += 1;
                match self.processor.decode(&packet) {
                    Ok(Some(output)) => {
                        self.decode_succeeded();
                        self.dispatch(output);
                        self.receive_remaining();
                    }
                    Ok(None) => self.decode_succeeded(),
                    Err(e) => self.decode_failed(e),
                }
            }
            PipelineMessage::EndOfStream => self.drain(),
            PipelineMessage::Error(description) => {
                warn!("{} {} 上游错误: {}", log_ctx(), self.processor.label(), description);
                self.emit(PipelineMessage::Error(description));
            }
        }
    }

    /// 解码输出：seek 中先判定，否则直接发出
    fn dispatch(&mut self, output: P::Output) {
        self.stats.decoded += 1;
        let Some(target) = self.seek.as_ref().map(|s| s.target) else {
            self.emit_data(output);
            return;
        };

        match self.processor.resolve_seek(target, output) {
            SeekResolution::Discard => {
                self.stats.discarded += 1;
                self.state = DecodeState::Discarding;
            }
            SeekResolution::Done { achieved, outputs } => {
                let seq = self.seek.take().map(|s| s.seq).unwrap_or(self.accepted_seq);
                debug!(
                    "{} {} seek #{} 完成: 目标 {:.3}s，实际 {:.3}s",
                    log_ctx(),
                    self.processor.label(),
                    seq,
                    target,
                    achieved
                );
                self.state = DecodeState::Decoding;
                if !self.emit(PipelineMessage::SeekDone { seq, time: achieved }) {
                    return;
                }
                for output in outputs {
                    self.emit_data(output);
                }
            }
        }
    }

    /// 取完当前包解出的所有输出，解码器里不会积压
    fn receive_remaining(&mut self) {
        while self.state != DecodeState::Closed {
            match self.processor.receive() {
                Ok(Some(output)) => self.dispatch(output),
                Ok(None) => break,
                Err(e) => {
                    warn!("{} {} 取帧失败: {}", log_ctx(), self.processor.label(), e);
                    break;
                }
            }
        }
    }

    /// EndOfStream：反复 flush 直到解码器没有输出，然后发出唯一的 EndOfStream
    fn drain(&mut self) {
        self.state = DecodeState::Draining;
        loop {
            match self.processor.flush() {
                Ok(Some(output)) => {
                    self.dispatch(output);
                    if self.state == DecodeState::Closed {
                        return;
                    }
                    self.state = DecodeState::Draining;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("{} {} flush 失败: {}", log_ctx(), self.processor.label(), e);
                    break;
                }
            }
        }

        // 目标之后已经没有数据：按目标时间完成 seek
        if let Some(PendingSeek { seq, target }) = self.seek.take() {
            self.emit(PipelineMessage::SeekDone { seq, time: target });
        }
        self.emit(PipelineMessage::EndOfStream);
        self.drained = true;
        info!("{} {} 已排空，等待命令", log_ctx(), self.processor.label());
    }

    fn decode_succeeded(&mut self) {
        self.consecutive_errors = 0;
        self.degraded_reported = false;
    }

    fn decode_failed(&mut self, e: PlayerError) {
        self.stats.decode_errors += 1;
        self.consecutive_errors += 1;
        warn!("{} ⚠ {} 解码失败，丢弃该包: {}", log_ctx(), self.processor.label(), e);

        if self.consecutive_errors >= self.degraded_after && !self.degraded_reported {
            self.degraded_reported = true;
            let description = format!(
                "{} 流降级：连续 {} 个包解码失败（最近: {}）",
                self.processor.label(),
                self.consecutive_errors,
                e
            );
            error!("{} ❌ {}", log_ctx(), description);
            self.emit(PipelineMessage::Error(description));
        }
    }

    fn emit_data(&mut self, output: P::Output) {
        if self.emit(PipelineMessage::Data(output)) {
            self.stats.emitted += 1;
        }
    }

    /// 推入输出队列（队列满时阻塞，即背压）；队列已关闭时进入 Closed
    fn emit(&mut self, msg: PipelineMessage<P::Output>) -> bool {
        match self.output.push(msg) {
            Ok(()) => true,
            Err(e) => {
                if let PipelineMessage::Data(output) = e.into_inner() {
                    self.processor.discard(output);
                }
                self.state = DecodeState::Closed;
                false
            }
        }
    }
}

/// 解码线程句柄（持有命令通道发送端）
pub struct WorkerHandle {
    label: &'static str,
    commands: Sender<WorkerCommand>,
    thread_handle: Option<JoinHandle<WorkerStats>>,
}

impl WorkerHandle {
    pub fn spawn<P: StreamProcessor>(
        processor: P,
        input: Arc<MessageQueue<Packet>>,
        output: Arc<MessageQueue<P::Output>>,
        degraded_after: u32,
        poll_interval: Duration,
    ) -> Result<Self> {
        let label = processor.label();
        let (commands, command_rx) = unbounded();
        let worker =
            DecoderWorker::new(processor, input, output, command_rx, degraded_after, poll_interval);
        let thread_handle = thread::Builder::new()
            .name(format!("{}-decoder", label))
            .spawn(move || worker.run())?;
        Ok(Self {
            label,
            commands,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn send(&self, cmd: WorkerCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }

    pub fn seek(&self, seq: u64) -> bool {
        self.send(WorkerCommand::Seek { seq })
    }

    pub fn set_frame_rate(&self, fps: f64) -> bool {
        self.send(WorkerCommand::SetFrameRate(fps))
    }

    pub fn close(&self) {
        let _ = self.commands.send(WorkerCommand::Close);
    }

    pub fn is_finished(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// 等待线程退出（调用方需先 close 或关闭输入队列）
    pub fn join(&mut self) -> Option<WorkerStats> {
        let handle = self.thread_handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                error!("{} ❌ {} 解码线程 panic", log_ctx(), self.label);
                None
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.close();
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    /// 输出 = 包的 pts，带固定的内部延迟；payload 第一个字节为 1 表示解码失败
    /// `burst` > 1 时一个包解出多个输出（间隔 1ms），多出来的通过 receive 取
    struct DelayLine {
        latency: usize,
        burst: usize,
        pending: VecDeque<f64>,
        ready: VecDeque<f64>,
        resets: usize,
    }

    impl DelayLine {
        fn new(latency: usize) -> Self {
            Self {
                latency,
                burst: 1,
                pending: VecDeque::new(),
                ready: VecDeque::new(),
                resets: 0,
            }
        }
    }

    impl StreamProcessor for DelayLine {
        type Output = f64;

        fn label(&self) -> &'static str {
            "test"
        }

        fn decode(&mut self, packet: &Packet) -> Result<Option<f64>> {
            if packet.data.first() == Some(&1) {
                return Err(PlayerError::DecodeError("bad".into()));
            }
            let pts = packet.pts.unwrap_or(0.0);
            self.pending.push_back(pts);
            for k in 1..self.burst {
                self.ready.push_back(pts + k as f64 * 0.001);
            }
            if self.pending.len() > self.latency {
                Ok(self.pending.pop_front())
            } else {
                Ok(None)
            }
        }

        fn receive(&mut self) -> Result<Option<f64>> {
            Ok(self.ready.pop_front())
        }

        fn flush(&mut self) -> Result<Option<f64>> {
            Ok(self.ready.pop_front().or_else(|| self.pending.pop_front()))
        }

        fn reset(&mut self, _anchor: Option<f64>) {
            self.resets += 1;
            self.pending.clear();
            self.ready.clear();
        }

        fn resolve_seek(&mut self, target: f64, output: f64) -> SeekResolution<f64> {
            if output < target - 0.01 {
                SeekResolution::Discard
            } else {
                SeekResolution::Done {
                    achieved: output,
                    outputs: vec![output],
                }
            }
        }
    }

    struct Harness {
        input: Arc<MessageQueue<Packet>>,
        output: Arc<MessageQueue<f64>>,
        handle: WorkerHandle,
    }

    fn start(latency: usize, degraded_after: u32) -> Harness {
        start_with(DelayLine::new(latency), degraded_after)
    }

    fn start_with(processor: DelayLine, degraded_after: u32) -> Harness {
        let input = Arc::new(MessageQueue::new(64));
        let output = Arc::new(MessageQueue::new(64));
        let handle = WorkerHandle::spawn(
            processor,
            input.clone(),
            output.clone(),
            degraded_after,
            Duration::from_millis(5),
        )
        .unwrap();
        Harness {
            input,
            output,
            handle,
        }
    }

    fn packet(t: f64) -> PipelineMessage<Packet> {
        PipelineMessage::Data(Packet::new(0, vec![0]).with_timestamps(Some(t), Some(t)))
    }

    fn bad_packet() -> PipelineMessage<Packet> {
        PipelineMessage::Data(Packet::new(0, vec![1]))
    }

    /// 取输出直到 EndOfStream（或超时）
    fn collect_until_eos(output: &MessageQueue<f64>) -> Vec<PipelineMessage<f64>> {
        let mut messages = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(msg) = output.pop_timeout(Duration::from_millis(50)) {
                let done = msg == PipelineMessage::EndOfStream;
                messages.push(msg);
                if done {
                    break;
                }
            }
        }
        messages
    }

    #[test]
    fn test_eof_drain_emits_every_frame_then_one_eos() {
        let h = start(3, 8);
        for i in 0..10 {
            h.input.push(packet(i as f64 * 0.1)).unwrap();
        }
        h.input.push(PipelineMessage::EndOfStream).unwrap();

        let messages = collect_until_eos(&h.output);
        let times: Vec<f64> = messages
            .iter()
            .filter_map(|m| match m {
                PipelineMessage::Data(t) => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(times.len(), 10);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            messages.iter().filter(|m| **m == PipelineMessage::EndOfStream).count(),
            1
        );
        assert_eq!(messages.last(), Some(&PipelineMessage::EndOfStream));
    }

    #[test]
    fn test_stale_seek_done_is_dropped() {
        let mut h = start(0, 8);
        assert!(h.handle.seek(1));
        assert!(h.handle.seek(2));
        h.input.push(PipelineMessage::SeekDone { seq: 1, time: 1.0 }).unwrap();
        h.input.push(packet(1.0)).unwrap();
        h.input.push(PipelineMessage::SeekDone { seq: 2, time: 2.0 }).unwrap();
        h.input.push(packet(1.9)).unwrap();
        h.input.push(packet(2.0)).unwrap();
        h.input.push(packet(2.1)).unwrap();
        h.input.push(PipelineMessage::EndOfStream).unwrap();

        let messages = collect_until_eos(&h.output);
        let seek_dones: Vec<_> = messages
            .iter()
            .filter(|m| matches!(m, PipelineMessage::SeekDone { .. }))
            .collect();
        assert_eq!(seek_dones, vec![&PipelineMessage::SeekDone { seq: 2, time: 2.0 }]);
        // 哨兵之后第一个输出就是达到的时间
        let after: Vec<_> = messages
            .iter()
            .skip_while(|m| !matches!(m, PipelineMessage::SeekDone { .. }))
            .skip(1)
            .cloned()
            .collect();
        assert_eq!(
            after,
            vec![
                PipelineMessage::Data(2.0),
                PipelineMessage::Data(2.1),
                PipelineMessage::EndOfStream
            ]
        );

        h.handle.close();
        let stats = h.handle.join().unwrap();
        assert_eq!(stats.seeks, 1);
        assert_eq!(stats.discarded, 1);
        assert!(stats.stale_dropped >= 2);
    }

    #[test]
    fn test_seek_at_eof_completes_at_target() {
        let h = start(0, 8);
        h.input.push(PipelineMessage::SeekDone { seq: 1, time: 9.0 }).unwrap();
        h.input.push(packet(8.0)).unwrap();
        h.input.push(PipelineMessage::EndOfStream).unwrap();

        let messages = collect_until_eos(&h.output);
        assert_eq!(
            messages,
            vec![
                PipelineMessage::SeekDone { seq: 1, time: 9.0 },
                PipelineMessage::EndOfStream
            ]
        );
    }

    #[test]
    fn test_seek_command_wakes_drained_worker() {
        let h = start(0, 8);
        h.input.push(packet(0.0)).unwrap();
        h.input.push(PipelineMessage::EndOfStream).unwrap();
        assert_eq!(collect_until_eos(&h.output).len(), 2);

        assert!(h.handle.seek(1));
        h.input.push(PipelineMessage::SeekDone { seq: 1, time: 0.0 }).unwrap();
        h.input.push(packet(0.0)).unwrap();
        h.input.push(PipelineMessage::EndOfStream).unwrap();

        assert_eq!(
            collect_until_eos(&h.output),
            vec![
                PipelineMessage::SeekDone { seq: 1, time: 0.0 },
                PipelineMessage::Data(0.0),
                PipelineMessage::EndOfStream
            ]
        );
    }

    #[test]
    fn test_repeated_decode_errors_report_degraded_once() {
        let h = start(0, 3);
        for _ in 0..5 {
            h.input.push(bad_packet()).unwrap();
        }
        h.input.push(packet(0.5)).unwrap();
        h.input.push(PipelineMessage::EndOfStream).unwrap();

        let messages = collect_until_eos(&h.output);
        let errors = messages
            .iter()
            .filter(|m| matches!(m, PipelineMessage::Error(_)))
            .count();
        assert_eq!(errors, 1);
        // 降级不会停止管线
        assert!(messages.contains(&PipelineMessage::Data(0.5)));
    }

    #[test]
    fn test_close_while_blocked_on_pop() {
        let mut h = start(2, 8);
        h.input.push(packet(0.0)).unwrap();
        thread::sleep(Duration::from_millis(20));

        h.input.clear();
        h.input.close();
        let started = Instant::now();
        let stats = h.handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(stats.packets, 1);
        assert_eq!(h.input.payload_count(), 0);
        assert_eq!(h.output.pop(false), Some(PipelineMessage::Closed));
    }

    #[test]
    fn test_multi_frame_packets_are_emitted_without_eof() {
        let mut h = start_with(
            DelayLine {
                burst: 3,
                ..DelayLine::new(0)
            },
            8,
        );
        for i in 0..4 {
            h.input.push(packet(i as f64)).unwrap();
        }

        // 不发 EndOfStream：每个包的 3 个输出都应该已经发出
        let mut times = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while times.len() < 12 && Instant::now() < deadline {
            if let Some(PipelineMessage::Data(t)) = h.output.pop_timeout(Duration::from_millis(50)) {
                times.push(t);
            }
        }
        assert_eq!(times.len(), 12);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(times[3], 1.0);

        h.handle.close();
        let stats = h.handle.join().unwrap();
        assert_eq!(stats.packets, 4);
        assert_eq!(stats.emitted, 12);
    }

    #[test]
    fn test_close_command_reaches_idle_worker() {
        let mut h = start(0, 8);
        thread::sleep(Duration::from_millis(20));

        // 输入队列为空且没有关闭，命令仍然会被处理
        let started = Instant::now();
        h.handle.close();
        let stats = h.handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(stats.packets, 0);
        assert!(!h.input.is_closed());
        assert_eq!(h.output.pop(false), Some(PipelineMessage::Closed));
    }
}
