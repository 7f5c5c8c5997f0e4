//! 集成测试用的脚本化后端：按参数生成交错的音视频数据包，解码器把包里的时间原样输出

#![allow(dead_code)]

use myy_pipeline::core::{
    AudioFormat, CodecParameters, CpuFrame, FrameShape, InitGuard, MediaKind, MediaSource, Packet,
    PixelFormat, Plane, PlayerError, Result, SampleShape, StreamInfo, SurfaceHandle,
};
use myy_pipeline::player::codec::{
    AudioCodec, DecodedPicture, DecodedSamples, DecodedSurface, FramePool, SamplePool,
    SurfaceCodec, VideoCodec,
};
use myy_pipeline::player::{Container, MediaBackend};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const VIDEO_STREAM: usize = 0;
pub const AUDIO_STREAM: usize = 1;
/// 每个音频包 960 帧（48kHz 下 20ms）
pub const AUDIO_FRAMES_PER_PACKET: usize = 960;
pub const AUDIO_PACKET_SECS: f64 = 0.02;

static REGISTRY: InitGuard = InitGuard::new("synthetic-registry");
static REGISTRY_INITS: AtomicUsize = AtomicUsize::new(0);

/// 进程级注册表被初始化的次数
pub fn registry_inits() -> usize {
    REGISTRY_INITS.load(Ordering::SeqCst)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 合成媒体的参数
#[derive(Debug, Clone)]
pub struct Synthetic {
    pub fps: f64,
    pub duration: f64,
    pub keyframe_interval: usize,
    pub video: bool,
    pub audio: bool,
    pub subtitle_only: bool,
    pub video_codec: String,
    /// 视频解码器内部延迟（包数）
    pub codec_latency: usize,
    /// 第几次读取（从 0 开始）返回损坏的包
    pub corrupt_reads: Vec<usize>,
    /// 非关键帧的视频包没有时间戳
    pub missing_timestamps: bool,
    /// 这些视频帧的包解码失败
    pub bad_video_frames: Vec<usize>,
    /// 这个区间内没有音频包
    pub audio_gap: Option<(f64, f64)>,
    pub surfaces: bool,
}

impl Default for Synthetic {
    fn default() -> Self {
        Self {
            fps: 30.0,
            duration: 10.0,
            keyframe_interval: 12,
            video: true,
            audio: false,
            subtitle_only: false,
            video_codec: "synthetic-video".into(),
            codec_latency: 0,
            corrupt_reads: Vec::new(),
            missing_timestamps: false,
            bad_video_frames: Vec::new(),
            audio_gap: None,
            surfaces: false,
        }
    }
}

impl Synthetic {
    pub fn frame_count(&self) -> usize {
        (self.duration * self.fps).round() as usize
    }

    pub fn frame_time(&self, index: usize) -> f64 {
        index as f64 / self.fps
    }
}

/// 包负载：第一个字节是解码失败标记，后面是时间
fn payload(bad: bool, time: f64) -> Vec<u8> {
    let mut data = vec![u8::from(bad)];
    data.extend_from_slice(&time.to_le_bytes());
    data
}

fn payload_time(data: &[u8]) -> Option<f64> {
    let bytes: [u8; 8] = data.get(1..9)?.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}

/// 打开/关闭计数（跨线程观察）
#[derive(Debug, Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub seeks: AtomicUsize,
}

impl Counters {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct SyntheticBackend {
    pub media: Synthetic,
    pub counters: Arc<Counters>,
}

impl SyntheticBackend {
    pub fn new(media: Synthetic) -> Self {
        Self {
            media,
            counters: Arc::new(Counters::default()),
        }
    }
}

impl MediaBackend for SyntheticBackend {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn ensure_initialized(&self) -> Result<()> {
        REGISTRY.ensure_initialized(|| {
            REGISTRY_INITS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn open_container(&self, source: &MediaSource) -> Result<Box<dyn Container>> {
        if source.location().contains("missing") {
            return Err(PlayerError::ContainerOpen(format!(
                "{}: 文件不存在",
                source.location()
            )));
        }
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticContainer::new(
            self.media.clone(),
            self.counters.clone(),
        )))
    }
}

/// 按时间顺序交错的数据包 + 每个包的真实时间（容器内部用于 seek）
pub struct SyntheticContainer {
    media: Synthetic,
    streams: Vec<StreamInfo>,
    packets: Vec<(f64, Packet)>,
    position: usize,
    reads: usize,
    closed: bool,
    counters: Arc<Counters>,
}

impl SyntheticContainer {
    pub fn new(media: Synthetic, counters: Arc<Counters>) -> Self {
        let mut streams = Vec::new();
        let mut packets = Vec::new();

        if media.subtitle_only {
            streams.push(StreamInfo {
                index: 0,
                kind: MediaKind::Subtitle,
                codec: CodecParameters {
                    codec_name: "subrip".into(),
                    ..Default::default()
                },
                duration: Some(media.duration),
            });
        }

        if media.video && !media.subtitle_only {
            streams.push(StreamInfo {
                index: VIDEO_STREAM,
                kind: MediaKind::Video,
                codec: CodecParameters {
                    codec_name: media.video_codec.clone(),
                    width: 4,
                    height: 2,
                    frame_rate: Some(media.fps),
                    frame_rate_reliable: true,
                    ..Default::default()
                },
                duration: Some(media.duration),
            });
            for i in 0..media.frame_count() {
                let t = media.frame_time(i);
                let keyframe = i % media.keyframe_interval.max(1) == 0;
                let ts = if media.missing_timestamps && !keyframe {
                    None
                } else {
                    Some(t)
                };
                let bad = media.bad_video_frames.contains(&i);
                let packet = Packet::new(VIDEO_STREAM, payload(bad, t))
                    .with_timestamps(ts, ts)
                    .with_duration(Some(1.0 / media.fps))
                    .with_keyframe(keyframe);
                packets.push((t, packet));
            }
        }

        if media.audio && !media.subtitle_only {
            streams.push(StreamInfo {
                index: AUDIO_STREAM,
                kind: MediaKind::Audio,
                codec: CodecParameters {
                    codec_name: "synthetic-audio".into(),
                    sample_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                duration: Some(media.duration),
            });
            let count = (media.duration / AUDIO_PACKET_SECS).round() as usize;
            for i in 0..count {
                let t = i as f64 * AUDIO_PACKET_SECS;
                if let Some((from, to)) = media.audio_gap {
                    if t >= from - 1e-9 && t < to - 1e-9 {
                        continue;
                    }
                }
                let packet = Packet::new(AUDIO_STREAM, payload(false, t))
                    .with_timestamps(Some(t), Some(t))
                    .with_duration(Some(AUDIO_PACKET_SECS))
                    .with_keyframe(true);
                packets.push((t, packet));
            }
        }

        // 稳定排序：同一时刻视频在前
        packets.sort_by(|a, b| a.0.total_cmp(&b.0));

        Self {
            media,
            streams,
            packets,
            position: 0,
            reads: 0,
            closed: false,
            counters,
        }
    }
}

impl Container for SyntheticContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn duration(&self) -> Option<f64> {
        Some(self.media.duration)
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.closed {
            return Err(PlayerError::Closed);
        }
        let read = self.reads;
        self.reads += 1;
        if self.media.corrupt_reads.contains(&read) && self.position < self.packets.len() {
            // 损坏的包同样占掉一个位置
            self.position += 1;
            return Err(PlayerError::CorruptPacket(format!("第 {} 次读取", read)));
        }
        let packet = self.packets.get(self.position).map(|(_, p)| p.clone());
        if packet.is_some() {
            self.position += 1;
        }
        Ok(packet)
    }

    fn seek_to_keyframe(&mut self, time: f64) -> Result<f64> {
        if self.closed {
            return Err(PlayerError::Closed);
        }
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        // 没有视频时每个音频包都是关键帧
        let period = if self.media.video {
            self.media.keyframe_interval.max(1) as f64 / self.media.fps
        } else {
            AUDIO_PACKET_SECS
        };
        let keyframe = ((time + 1e-9) / period).floor() * period;
        self.position = self
            .packets
            .iter()
            .position(|(t, _)| *t >= keyframe - 1e-9)
            .unwrap_or(self.packets.len());
        Ok(keyframe)
    }

    fn video_codec(&self, stream: &StreamInfo) -> Result<Box<dyn VideoCodec>> {
        if stream.codec.codec_name == "unsupported" {
            return Err(PlayerError::UnsupportedCodec(stream.codec.codec_name.clone()));
        }
        Ok(Box::new(EchoVideoCodec::new(self.media.codec_latency)))
    }

    fn surface_codec(&self, _stream: &StreamInfo) -> Result<Option<Box<dyn SurfaceCodec>>> {
        if self.media.surfaces {
            Ok(Some(Box::new(EchoSurfaceCodec::default())))
        } else {
            Ok(None)
        }
    }

    fn audio_codec(&self, _stream: &StreamInfo, output: AudioFormat) -> Result<Box<dyn AudioCodec>> {
        Ok(Box::new(ToneCodec { output }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn description(&self) -> String {
        format!("synthetic {:.1}s @ {} fps", self.media.duration, self.media.fps)
    }
}

/// 输出 4x2 RGBA 帧，时间戳取自包，带可配置的内部延迟
pub struct EchoVideoCodec {
    latency: usize,
    pending: VecDeque<Option<f64>>,
}

impl EchoVideoCodec {
    pub fn new(latency: usize) -> Self {
        Self {
            latency,
            pending: VecDeque::new(),
        }
    }

    fn picture(timestamp: Option<f64>, pool: &mut FramePool) -> DecodedPicture {
        let shape = FrameShape {
            format: PixelFormat::RGBA,
            len: 32,
        };
        DecodedPicture {
            timestamp,
            frame: CpuFrame {
                width: 4,
                height: 2,
                format: PixelFormat::RGBA,
                planes: vec![Plane {
                    data: pool.acquire(shape, 32),
                    stride: 16,
                }],
            },
        }
    }
}

impl VideoCodec for EchoVideoCodec {
    fn decode(&mut self, packet: &Packet, pool: &mut FramePool) -> Result<Option<DecodedPicture>> {
        if packet.data.first() == Some(&1) {
            return Err(PlayerError::DecodeError(format!(
                "坏包 {:?}",
                payload_time(&packet.data)
            )));
        }
        self.pending.push_back(packet.pts);
        if self.pending.len() > self.latency {
            Ok(self.pending.pop_front().map(|ts| Self::picture(ts, pool)))
        } else {
            Ok(None)
        }
    }

    fn flush(&mut self, pool: &mut FramePool) -> Result<Option<DecodedPicture>> {
        Ok(self.pending.pop_front().map(|ts| Self::picture(ts, pool)))
    }

    fn reset(&mut self) {
        self.pending.clear();
    }

    fn name(&self) -> String {
        "echo".into()
    }
}

#[derive(Default)]
pub struct EchoSurfaceCodec {
    next_handle: u64,
}

impl SurfaceCodec for EchoSurfaceCodec {
    fn decode_to_surface(&mut self, packet: &Packet) -> Result<Option<DecodedSurface>> {
        self.next_handle += 1;
        Ok(Some(DecodedSurface {
            timestamp: packet.pts,
            handle: SurfaceHandle(self.next_handle),
        }))
    }

    fn flush(&mut self) -> Result<Option<DecodedSurface>> {
        Ok(None)
    }

    fn reset(&mut self) {}

    fn name(&self) -> String {
        "echo-surface".into()
    }
}

/// 每个包输出 960 帧、值为 0.5 的交错采样
pub struct ToneCodec {
    output: AudioFormat,
}

impl AudioCodec for ToneCodec {
    fn output_format(&self) -> AudioFormat {
        self.output
    }

    fn decode(&mut self, packet: &Packet, pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        let channels = self.output.channels;
        let len = AUDIO_FRAMES_PER_PACKET * channels as usize;
        let mut samples = pool.acquire(SampleShape { channels, len }, len);
        samples.iter_mut().for_each(|s| *s = 0.5);
        Ok(Some(DecodedSamples {
            timestamp: packet.pts,
            samples,
        }))
    }

    fn flush(&mut self, _pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        Ok(None)
    }

    fn reset(&mut self) {}

    fn name(&self) -> String {
        "tone".into()
    }
}

/// 模拟渲染循环：每次把期望时间推进一帧，直到视频流结束
pub fn play_to_end(
    pipeline: &mut myy_pipeline::PipelineCoordinator,
    start: f64,
) -> Vec<myy_pipeline::core::VideoFrame> {
    use myy_pipeline::{FrameResult, StreamSelector};
    use std::time::{Duration, Instant};

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut frames = Vec::new();
    let mut wanted = start;
    while !pipeline.is_end_of_stream(StreamSelector::Video) {
        assert!(Instant::now() < deadline, "播放超时（已取 {} 帧）", frames.len());
        if let FrameResult::NewFrame(frame) = pipeline.get_frame_for_time(wanted).unwrap() {
            wanted = frame.time + pipeline.frame_period();
            frames.push(frame);
        }
    }
    frames
}

/// 等待下一个新帧
pub fn next_frame(
    pipeline: &mut myy_pipeline::PipelineCoordinator,
    wanted: f64,
) -> myy_pipeline::core::VideoFrame {
    use myy_pipeline::FrameResult;
    use std::time::{Duration, Instant};

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "等待 {:.3}s 的帧超时", wanted);
        if let FrameResult::NewFrame(frame) = pipeline.get_frame_for_time(wanted).unwrap() {
            return frame;
        }
    }
}
