use crate::core::{
    log_ctx, AudioFrame, AudioInfo, BufferStatus, FrameResult, MediaInfo, MediaKind, MediaSource,
    MessageQueue, OpenOptions, PipelineConfig, PipelineMessage, PlayerError, Result,
    StreamSelector, VideoFrame, VideoInfo,
};
use crate::player::audio_worker::{AudioProcessor, AudioRecycler};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer::{Demuxer, PacketQueue};
use crate::player::demuxer_thread::DemuxerThread;
use crate::player::source::MediaBackend;
use crate::player::video_worker::{FrameRecycler, VideoProcessor};
use crate::player::worker::{StreamProcessor, WorkerHandle, WorkerStats};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 从输出队列观察到的一条消息
enum Observed<O> {
    Output(O),
    /// seek 前的旧输出
    Stale(O),
    Control,
}

/// 一条流在协调器侧的状态：两端队列、解码线程、seek/EOF 观察结果
struct StreamSlot<P: StreamProcessor> {
    kind: MediaKind,
    input: Arc<PacketQueue>,
    output: Arc<MessageQueue<P::Output>>,
    /// start_decoding 之前由协调器持有
    processor: Option<P>,
    worker: Option<WorkerHandle>,
    recycle: Box<dyn Fn(P::Output) + Send>,
    /// 等待中的 seek 序号（SeekDone 到达前的输出都是旧数据）
    awaiting_seq: Option<u64>,
    eof_observed: bool,
    closed_observed: bool,
    last_error: Option<String>,
    dropped: u64,
}

impl<P: StreamProcessor> StreamSlot<P> {
    fn new(
        kind: MediaKind,
        processor: P,
        recycle: Box<dyn Fn(P::Output) + Send>,
        packet_capacity: usize,
        output_capacity: usize,
    ) -> Self {
        Self {
            kind,
            input: Arc::new(PacketQueue::new(packet_capacity)),
            output: Arc::new(MessageQueue::new(output_capacity)),
            processor: Some(processor),
            worker: None,
            recycle,
            awaiting_seq: None,
            eof_observed: false,
            closed_observed: false,
            last_error: None,
            dropped: 0,
        }
    }

    fn start(&mut self, degraded_after: u32, poll_interval: Duration) -> Result<()> {
        let processor = self
            .processor
            .take()
            .ok_or_else(|| PlayerError::InvalidState(format!("{:?} 解码线程已启动", self.kind)))?;
        let worker =
            WorkerHandle::spawn(
            processor,
            self.input.clone(),
            self.output.clone(),
            degraded_after,
            poll_interval,
        )?;
        self.worker = Some(worker);
        Ok(())
    }

    fn observe(&mut self, msg: PipelineMessage<P::Output>) -> Observed<P::Output> {
        match msg {
            PipelineMessage::Data(output) if self.awaiting_seq.is_some() => Observed::Stale(output),
            PipelineMessage::Data(output) => Observed::Output(output),
            PipelineMessage::SeekDone { seq, time } => {
                if self.awaiting_seq == Some(seq) {
                    debug!("{} {:?} seek #{} 完成于 {:.3}s", log_ctx(), self.kind, seq, time);
                    self.awaiting_seq = None;
                    self.eof_observed = false;
                }
                Observed::Control
            }
            PipelineMessage::EndOfStream => {
                if self.awaiting_seq.is_none() {
                    info!("{} {:?} 流结束", log_ctx(), self.kind);
                    self.eof_observed = true;
                }
                Observed::Control
            }
            PipelineMessage::Error(description) => {
                warn!("{} ⚠ {:?} 流错误: {}", log_ctx(), self.kind, description);
                self.last_error = Some(description);
                Observed::Control
            }
            PipelineMessage::Closed => {
                self.closed_observed = true;
                Observed::Control
            }
        }
    }

    fn discard(&mut self, output: P::Output) {
        self.dropped += 1;
        (self.recycle)(output);
    }

    /// 消费队首的控制消息和旧输出（不阻塞），返回流是否已结束
    fn is_ended(&mut self) -> bool {
        loop {
            let awaiting = self.awaiting_seq.is_some();
            let Some(msg) = self.output.pop_if(|m| awaiting || !m.is_data()) else {
                break;
            };
            if let Observed::Stale(output) | Observed::Output(output) = self.observe(msg) {
                self.discard(output);
            }
        }
        self.eof_observed || self.closed_observed
    }

    /// 开始一次 seek：标记等待、清空输出队列、通知解码线程
    fn begin_seek(&mut self, seq: u64) {
        self.awaiting_seq = Some(seq);
        self.eof_observed = false;
        let mut flushed = 0;
        for msg in self.output.drain() {
            if let PipelineMessage::Data(output) = msg {
                flushed += 1;
                (self.recycle)(output);
            }
        }
        if flushed > 0 {
            debug!("{} 🧹 {:?} Seek 清空 {} 个输出", log_ctx(), self.kind, flushed);
        }
        if let Some(worker) = &self.worker {
            worker.seek(seq);
        }
    }

    fn shutdown(&mut self) -> Option<WorkerStats> {
        if let Some(worker) = &self.worker {
            worker.close();
        }
        self.input.close();
        self.output.close();
        let stats = self.worker.as_mut().and_then(|w| w.join());
        self.worker = None;

        self.input.clear();
        for msg in self.output.drain() {
            if let PipelineMessage::Data(output) = msg {
                (self.recycle)(output);
            }
        }
        stats
    }
}

/// 管线协调器 - 面向播放端的门面
///
/// 持有解封装器和各条流的解码线程，在调用方线程（渲染/混音线程）上提供
/// `get_frame_for_time` / `fill_audio_buffer` 等同步风格的接口
pub struct PipelineCoordinator {
    config: PipelineConfig,
    media_info: MediaInfo,
    /// start_decoding 之前持有，之后移入 Demuxer 线程
    demuxer: Option<Demuxer>,
    demuxer_thread: Option<DemuxerThread>,
    video: Option<StreamSlot<VideoProcessor>>,
    audio: Option<StreamSlot<AudioProcessor>>,
    video_recycler: Option<FrameRecycler>,
    audio_recycler: Option<AudioRecycler>,
    next_seq: u64,
    /// 一帧的时长（get_frame_for_time 用半帧做判断）
    frame_period: f64,
    last_video_time: Option<f64>,
    /// 部分消费的音频缓冲和已写出的采样数
    audio_partial: Option<(AudioFrame, usize)>,
    audio_clock: f64,
    worker_stats: Vec<(MediaKind, WorkerStats)>,
    closed: bool,
}

impl PipelineCoordinator {
    /// 打开媒体源并创建解码器（线程在 start_decoding 时才启动）
    ///
    /// 失败：`ContainerOpen`、`UnsupportedCodec`、`NoDecodableStreams`，
    /// 失败时已打开的容器会被关闭
    pub fn open(
        backend: &dyn MediaBackend,
        source: &MediaSource,
        options: OpenOptions,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!("{} 📂 打开媒体源: {} ({:?})", log_ctx(), source.location(), options);

        let mut demuxer = Demuxer::open(backend, source)?;
        let video_stream = demuxer.best_stream(MediaKind::Video).cloned();
        let audio_stream = if options.want_audio {
            demuxer.best_stream(MediaKind::Audio).cloned()
        } else {
            None
        };
        if video_stream.is_none() && audio_stream.is_none() {
            demuxer.close();
            return Err(PlayerError::NoDecodableStreams);
        }

        let mut video = None;
        let mut video_info = None;
        let mut frame_period = 1.0 / config.fallback_frame_rate;
        if let Some(stream) = &video_stream {
            let decoder = match VideoDecoder::open(demuxer.container()?, stream, options.want_hardware_accel) {
                Ok(decoder) => decoder,
                Err(e) => {
                    error!("{} ❌ 创建视频解码器失败: {}", log_ctx(), e);
                    demuxer.close();
                    return Err(e);
                }
            };
            let processor = VideoProcessor::new(decoder, stream, &config);
            frame_period = match processor.nominal_fps() {
                Some(fps) => 1.0 / fps,
                None => processor.frame_period(),
            };
            video_info = Some(VideoInfo {
                stream_index: stream.index,
                width: stream.codec.width,
                height: stream.codec.height,
                fps: 1.0 / processor.frame_period(),
                codec: stream.codec.codec_name.clone(),
                hardware_accelerated: processor.is_hardware_accelerated(),
            });
            let recycler = processor.recycler();
            let recycle = {
                let recycler = recycler.clone();
                Box::new(move |frame: VideoFrame| recycler.recycle(frame))
            };
            let slot = StreamSlot::new(
                MediaKind::Video,
                processor,
                recycle,
                config.video_packet_capacity,
                config.video_frame_capacity,
            );
            demuxer.attach(stream.index, slot.input.clone());
            video = Some((slot, recycler));
        }

        let mut audio = None;
        let mut audio_info = None;
        if let Some(stream) = &audio_stream {
            let decoder = match AudioDecoder::open(demuxer.container()?, stream, config.audio_output) {
                Ok(decoder) => decoder,
                Err(e) => {
                    error!("{} ❌ 创建音频解码器失败: {}", log_ctx(), e);
                    demuxer.close();
                    return Err(e);
                }
            };
            let processor = AudioProcessor::new(decoder, &config);
            audio_info = Some(AudioInfo {
                stream_index: stream.index,
                codec: stream.codec.codec_name.clone(),
                sample_rate: stream.codec.sample_rate,
                channels: stream.codec.channels,
                output: processor.output_format(),
            });
            let recycler = processor.recycler();
            let recycle = {
                let recycler = recycler.clone();
                Box::new(move |frame: AudioFrame| recycler.recycle(frame))
            };
            let slot = StreamSlot::new(
                MediaKind::Audio,
                processor,
                recycle,
                config.audio_packet_capacity,
                config.audio_frame_capacity,
            );
            demuxer.attach(stream.index, slot.input.clone());
            audio = Some((slot, recycler));
        }

        let media_info = MediaInfo {
            duration: demuxer.duration(),
            streams: demuxer.streams().to_vec(),
            video: video_info,
            audio: audio_info,
        };
        info!(
            "{} ✅ 媒体源已打开: 时长 {:?}s，视频 {}，音频 {}",
            log_ctx(),
            media_info.duration,
            media_info.video.is_some(),
            media_info.audio.is_some()
        );

        let (video, video_recycler) = match video {
            Some((slot, recycler)) => (Some(slot), Some(recycler)),
            None => (None, None),
        };
        let (audio, audio_recycler) = match audio {
            Some((slot, recycler)) => (Some(slot), Some(recycler)),
            None => (None, None),
        };

        Ok(Self {
            config,
            media_info,
            demuxer: Some(demuxer),
            demuxer_thread: None,
            video,
            audio,
            video_recycler,
            audio_recycler,
            next_seq: 0,
            frame_period,
            last_video_time: None,
            audio_partial: None,
            audio_clock: 0.0,
            worker_stats: Vec::new(),
            closed: false,
        })
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.demuxer_thread.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 当前判断用的帧时长
    pub fn frame_period(&self) -> f64 {
        self.frame_period
    }

    /// 启动解码线程和 Demuxer 线程
    pub fn start_decoding(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.demuxer_thread.is_some() {
            return Err(PlayerError::InvalidState("已经开始解码".into()));
        }
        let demuxer = self
            .demuxer
            .take()
            .ok_or_else(|| PlayerError::InvalidState("Demuxer 不可用".into()))?;

        let degraded_after = self.config.degraded_after;
        let poll_interval = self.config.demux_poll_interval();
        if let Some(slot) = self.video.as_mut() {
            slot.start(degraded_after, poll_interval)?;
        }
        if let Some(slot) = self.audio.as_mut() {
            slot.start(degraded_after, poll_interval)?;
        }
        self.demuxer_thread = Some(DemuxerThread::start(demuxer, poll_interval)?);
        info!("{} ▶ 开始解码", log_ctx());
        Ok(())
    }

    /// 取 `wanted` 时刻应显示的帧
    ///
    /// - 距上一帧不到半帧：ReuseLastFrame（不出队）
    /// - 否则出队，丢弃落后超过半帧的帧，返回第一个时间 ≥ wanted - 半帧 的帧
    /// - 最多等待 `frame_wait_timeout`；没有可用帧或流已结束时返回 ReuseLastFrame
    pub fn get_frame_for_time(&mut self, wanted: f64) -> Result<FrameResult> {
        self.ensure_open()?;
        let half = self.frame_period / 2.0;
        let timeout = self.config.frame_wait_timeout();
        let Some(slot) = self.video.as_mut() else {
            return Ok(FrameResult::ReuseLastFrame);
        };

        if slot.awaiting_seq.is_none() {
            if let Some(last) = self.last_video_time {
                if wanted < last + half {
                    return Ok(FrameResult::ReuseLastFrame);
                }
            }
        }
        if slot.is_ended() {
            return Ok(FrameResult::ReuseLastFrame);
        }

        let deadline = Instant::now() + timeout;
        let mut dropped = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let msg = if remaining.is_zero() {
                slot.output.pop(false)
            } else {
                slot.output.pop_timeout(remaining)
            };
            let Some(msg) = msg else {
                debug!("{} 等待视频帧超时（{:.3}s）", log_ctx(), wanted);
                return Ok(FrameResult::ReuseLastFrame);
            };

            match slot.observe(msg) {
                Observed::Output(frame) if frame.time < wanted - half => {
                    dropped += 1;
                    slot.discard(frame);
                }
                Observed::Output(frame) => {
                    if dropped > 0 {
                        debug!("{} 🗑️ 追帧丢弃了 {} 个过期视频帧", log_ctx(), dropped);
                    }
                    self.last_video_time = Some(frame.time);
                    return Ok(FrameResult::NewFrame(frame));
                }
                Observed::Stale(frame) => slot.discard(frame),
                Observed::Control => {
                    if slot.eof_observed || slot.closed_observed {
                        return Ok(FrameResult::ReuseLastFrame);
                    }
                }
            }
        }
    }

    /// Seek：分配新序号，通知解码线程，转发给 Demuxer
    pub fn seek(&mut self, time: f64) -> Result<()> {
        self.ensure_open()?;
        if !time.is_finite() {
            return Err(PlayerError::InvalidState(format!("无效的 seek 位置: {}", time)));
        }
        let time = time.max(0.0);
        self.next_seq += 1;
        let seq = self.next_seq;
        info!("{} 🎯 Seek #{} 到: {:.3}s", log_ctx(), seq, time);

        if let Some(slot) = self.video.as_mut() {
            slot.begin_seek(seq);
        }
        if let Some(slot) = self.audio.as_mut() {
            slot.begin_seek(seq);
        }
        self.last_video_time = None;
        if let Some((frame, _)) = self.audio_partial.take() {
            self.recycle_audio(frame);
        }
        self.audio_clock = time;

        if let Some(thread) = &self.demuxer_thread {
            thread.seek(seq, time)?;
        } else if let Some(demuxer) = self.demuxer.as_mut() {
            demuxer.seek(seq, time)?;
        }
        Ok(())
    }

    /// 回到开头（循环播放）
    pub fn loop_to_start(&mut self) -> Result<()> {
        self.seek(0.0)
    }

    /// 流是否结束：只有协调器自己读到 EndOfStream 才算（队列中的帧必须先被消费）
    ///
    /// 没有打开的流视为已结束
    pub fn is_end_of_stream(&mut self, selector: StreamSelector) -> bool {
        let video_ended = match self.video.as_mut() {
            Some(slot) => slot.is_ended(),
            None => true,
        };
        let audio_ended = match self.audio.as_mut() {
            Some(slot) => slot.is_ended(),
            None => true,
        };
        match selector {
            StreamSelector::Video => video_ended,
            StreamSelector::Audio => audio_ended,
            StreamSelector::All => video_ended && audio_ended,
        }
    }

    /// 设置标称帧率，0 表示恢复信任容器时间戳
    pub fn set_nominal_frame_rate(&mut self, fps: f64) -> Result<()> {
        self.ensure_open()?;
        if !fps.is_finite() || fps < 0.0 {
            return Err(PlayerError::ConfigError(format!("无效的帧率: {}", fps)));
        }
        let Some(slot) = self.video.as_mut() else {
            return Ok(());
        };

        if let Some(worker) = &slot.worker {
            worker.set_frame_rate(fps);
        } else if let Some(processor) = slot.processor.as_mut() {
            processor.set_nominal_frame_rate(if fps > 0.0 { Some(fps) } else { None });
        }

        self.frame_period = if fps > 0.0 {
            1.0 / fps
        } else {
            self.media_info
                .video
                .as_ref()
                .map(|v| 1.0 / v.fps)
                .unwrap_or(1.0 / self.config.fallback_frame_rate)
        };
        Ok(())
    }

    /// 拉取式音频消费：尽量填满 `buffer`（交错 f32），返回写入的采样数，不阻塞
    pub fn fill_audio_buffer(&mut self, buffer: &mut [f32]) -> usize {
        if self.closed {
            return 0;
        }
        let Some(slot) = self.audio.as_mut() else {
            return 0;
        };

        let mut written = 0;
        while written < buffer.len() {
            let Some((frame, offset)) = self.audio_partial.as_mut() else {
                let Some(msg) = slot.output.pop(false) else {
                    break;
                };
                match slot.observe(msg) {
                    Observed::Output(frame) => self.audio_partial = Some((frame, 0)),
                    Observed::Stale(frame) => slot.discard(frame),
                    Observed::Control => {
                        if slot.eof_observed || slot.closed_observed {
                            break;
                        }
                    }
                }
                continue;
            };

            let n = (buffer.len() - written).min(frame.samples.len() - *offset);
            buffer[written..written + n].copy_from_slice(&frame.samples[*offset..*offset + n]);
            written += n;
            *offset += n;

            let channels = frame.channels.max(1) as usize;
            self.audio_clock =
                frame.time + (*offset / channels) as f64 / frame.sample_rate.max(1) as f64;

            if *offset >= frame.samples.len() {
                if let Some((frame, _)) = self.audio_partial.take() {
                    (slot.recycle)(frame);
                }
            }
        }
        written
    }

    /// 下一个要写出的采样的时间（音频时钟）
    pub fn audio_time(&self) -> f64 {
        self.audio_clock
    }

    /// 音频时钟追上 `now` 还需要拉取的采样数（交错，含全部声道）
    ///
    /// 拉取式输出按它决定每次 `fill_audio_buffer` 的长度，音频消费速度就跟播放时钟一致
    pub fn audio_samples_due(&self, now: f64) -> usize {
        let Some(format) = self.media_info.audio.as_ref().map(|a| a.output) else {
            return 0;
        };
        let behind = now - self.audio_clock;
        if self.closed || !behind.is_finite() || behind <= 0.0 {
            return 0;
        }
        (behind * format.sample_rate as f64).round() as usize * format.channels as usize
    }

    /// 渲染端用完视频帧后归还
    pub fn recycle_frame(&self, frame: VideoFrame) {
        if let Some(recycler) = &self.video_recycler {
            recycler.recycle(frame);
        }
    }

    pub fn recycle_audio(&self, frame: AudioFrame) {
        if let Some(recycler) = &self.audio_recycler {
            recycler.recycle(frame);
        }
    }

    /// 最近一次上报的流错误（解码降级、读取失败）
    pub fn last_error(&self, kind: MediaKind) -> Option<&str> {
        match kind {
            MediaKind::Video => self.video.as_ref().and_then(|s| s.last_error.as_deref()),
            MediaKind::Audio => self.audio.as_ref().and_then(|s| s.last_error.as_deref()),
            _ => None,
        }
    }

    /// 获取缓冲状态（用于监控和调试）
    pub fn buffer_status(&self) -> BufferStatus {
        let (video_packets, video_frames) = self
            .video
            .as_ref()
            .map(|s| (s.input.len(), s.output.payload_count()))
            .unwrap_or((0, 0));
        let (audio_packets, audio_frames) = self
            .audio
            .as_ref()
            .map(|s| (s.input.len(), s.output.payload_count()))
            .unwrap_or((0, 0));
        let is_buffering = self.is_started()
            && !self.closed
            && self
                .video
                .as_ref()
                .map(|s| !s.eof_observed && video_frames == 0)
                .unwrap_or(false);
        BufferStatus {
            video_packets,
            audio_packets,
            video_frames,
            audio_frames,
            is_buffering,
        }
    }

    /// 已退出的解码线程统计（close 之后可用）
    pub fn worker_stats(&self) -> &[(MediaKind, WorkerStats)] {
        &self.worker_stats
    }

    /// 关闭管线：停止 Demuxer 线程和解码线程，释放所有队列中的负载（可重复调用）
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        info!("{} ⏹️ 关闭管线", log_ctx());

        if let Some(mut thread) = self.demuxer_thread.take() {
            thread.stop();
            info!("{} ✅ DemuxerThread 已停止", log_ctx());
        }
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.close();
        }

        if let Some((frame, _)) = self.audio_partial.take() {
            self.recycle_audio(frame);
        }
        if let Some(slot) = self.video.as_mut() {
            if let Some(stats) = slot.shutdown() {
                info!("{} ✅ 视频解码线程已结束: {:?}（协调器丢弃 {}）", log_ctx(), stats, slot.dropped);
                self.worker_stats.push((MediaKind::Video, stats));
            }
        }
        if let Some(slot) = self.audio.as_mut() {
            if let Some(stats) = slot.shutdown() {
                info!("{} ✅ 音频解码线程已结束: {:?}", log_ctx(), stats);
                self.worker_stats.push((MediaKind::Audio, stats));
            }
        }
        info!("{} ✅ 管线已关闭，所有线程已清理", log_ctx());
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(PlayerError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for PipelineCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}
