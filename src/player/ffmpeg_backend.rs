//! FFmpeg 后端（`ffmpeg` feature）
//!
//! ffmpeg-next 的上下文类型不是 Send，但每个容器/解码器实例只会在一个线程中使用：
//! 容器在 Demuxer 线程，解码器在各自的解码线程。

use crate::core::{
    AudioFormat, CodecParameters, CpuFrame, FrameShape, InitGuard, MediaKind, MediaSource, Packet,
    PixelFormat, Plane, PlayerError, Result, SampleShape, StreamInfo,
};
use crate::player::codec::{
    AudioCodec, DecodedPicture, DecodedSamples, FramePool, SamplePool, SurfaceCodec, VideoCodec,
};
use crate::player::source::{Container, MediaBackend};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, media, software, util};
use log::{debug, info, warn};
use std::collections::VecDeque;

static FFMPEG_INIT: InitGuard = InitGuard::new("FFmpeg");

/// 硬件解码器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccelType {
    D3D11VA,
    DXVA2,
    VAAPI,
    VideoToolbox,
    CUDA,
    QSV,
}

impl HwAccelType {
    pub fn name(&self) -> &'static str {
        match self {
            HwAccelType::D3D11VA => "D3D11VA",
            HwAccelType::DXVA2 => "DXVA2",
            HwAccelType::VAAPI => "VAAPI",
            HwAccelType::VideoToolbox => "VideoToolbox",
            HwAccelType::CUDA => "CUDA",
            HwAccelType::QSV => "QSV",
        }
    }

    /// 当前平台可尝试的硬件加速类型（按优先级排序）
    pub fn platform_candidates() -> Vec<HwAccelType> {
        let mut candidates = Vec::new();

        #[cfg(target_os = "windows")]
        {
            candidates.push(HwAccelType::D3D11VA);
            candidates.push(HwAccelType::DXVA2);
        }

        #[cfg(target_os = "macos")]
        candidates.push(HwAccelType::VideoToolbox);

        #[cfg(target_os = "linux")]
        candidates.push(HwAccelType::VAAPI);

        candidates.push(HwAccelType::CUDA);
        candidates.push(HwAccelType::QSV);
        candidates
    }
}

/// FFmpeg 媒体后端
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Self {
        Self
    }
}

impl MediaBackend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn ensure_initialized(&self) -> Result<()> {
        FFMPEG_INIT.ensure_initialized(|| ffmpeg::init().map_err(PlayerError::from))
    }

    fn open_container(&self, source: &MediaSource) -> Result<Box<dyn Container>> {
        Ok(Box::new(FfmpegContainer::open(source)?))
    }
}

fn rational_to_f64(r: util::rational::Rational) -> Option<f64> {
    if r.numerator() == 0 || r.denominator() == 0 {
        None
    } else {
        Some(r.numerator() as f64 / r.denominator() as f64)
    }
}

/// 基于 `format::context::Input` 的容器
pub struct FfmpegContainer {
    input: format::context::Input,
    streams: Vec<StreamInfo>,
    /// 每条流的时间基（秒）
    time_bases: Vec<f64>,
    location: String,
    closed: bool,
}

unsafe impl Send for FfmpegContainer {}

impl FfmpegContainer {
    pub fn open(source: &MediaSource) -> Result<Self> {
        let location = source.location();
        let input = match source {
            MediaSource::LocalFile(path) => format::input(path)
                .map_err(|e| PlayerError::ContainerOpen(format!("无法打开文件 {}: {}", location, e)))?,
            MediaSource::NetworkStream { protocol, .. } => {
                info!("🌐 {} 网络流，应用低延迟选项", protocol.as_str());
                let mut options = ffmpeg::Dictionary::new();
                // 丢弃损坏的帧并生成缺失的 PTS
                options.set("fflags", "+discardcorrupt+genpts");
                options.set("analyzeduration", "5000000");
                options.set("probesize", "10000000");
                options.set("timeout", "15000000");
                options.set("rw_timeout", "8000000");
                options.set("reconnect", "1");
                options.set("reconnect_streamed", "1");
                format::input_with_dictionary(&location, options).map_err(|e| {
                    PlayerError::ContainerOpen(format!("无法打开网络流 {}: {}", location, e))
                })?
            }
        };

        let mut streams = Vec::new();
        let mut time_bases = Vec::new();
        for stream in input.streams() {
            let time_base = rational_to_f64(stream.time_base()).unwrap_or(0.0);
            time_bases.push(time_base);
            streams.push(Self::describe(&stream, time_base));
        }

        info!(
            "✓ 已打开 {}（{} 条流，时长 {:.2}s）",
            location,
            streams.len(),
            input.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
        );

        Ok(Self {
            input,
            streams,
            time_bases,
            location,
            closed: false,
        })
    }

    fn describe(stream: &format::stream::Stream, time_base: f64) -> StreamInfo {
        let parameters = stream.parameters();
        let kind = match parameters.medium() {
            media::Type::Video => MediaKind::Video,
            media::Type::Audio => MediaKind::Audio,
            media::Type::Subtitle => MediaKind::Subtitle,
            _ => MediaKind::Data,
        };
        let mut codec = CodecParameters {
            codec_name: parameters.id().name().to_string(),
            ..Default::default()
        };

        if let Ok(context) = codec::context::Context::from_parameters(parameters) {
            match kind {
                MediaKind::Video => {
                    if let Ok(video) = context.decoder().video() {
                        codec.width = video.width();
                        codec.height = video.height();
                    }
                }
                MediaKind::Audio => {
                    if let Ok(audio) = context.decoder().audio() {
                        codec.sample_rate = audio.rate();
                        codec.channels = audio.channels();
                    }
                }
                _ => {}
            }
        }

        if kind == MediaKind::Video {
            let average = rational_to_f64(stream.avg_frame_rate());
            let real = rational_to_f64(stream.rate());
            codec.frame_rate = average.or(real);
            // 平均帧率和基础帧率一致时认为是恒定帧率
            codec.frame_rate_reliable = matches!((average, real), (Some(a), Some(r)) if (a - r).abs() < 1e-3);
        }

        let duration = (stream.duration() > 0).then(|| stream.duration() as f64 * time_base);
        StreamInfo {
            index: stream.index(),
            kind,
            codec,
            duration,
        }
    }

    fn time_base(&self, index: usize) -> f64 {
        self.time_bases.get(index).copied().unwrap_or(0.0)
    }

    fn parameters(&self, stream: &StreamInfo) -> Result<codec::Parameters> {
        self.input
            .stream(stream.index)
            .map(|s| s.parameters())
            .ok_or_else(|| PlayerError::UnsupportedCodec(format!("流 #{} 不存在", stream.index)))
    }
}

impl Container for FfmpegContainer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn duration(&self) -> Option<f64> {
        let duration = self.input.duration();
        (duration > 0).then(|| duration as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE))
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.closed {
            return Err(PlayerError::Closed);
        }
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => {
                let index = packet.stream();
                let tb = self.time_base(index);
                let to_secs = |ts: i64| ts as f64 * tb;
                Ok(Some(Packet {
                    stream_index: index,
                    dts: packet.dts().map(to_secs),
                    pts: packet.pts().map(to_secs),
                    duration: (packet.duration() > 0).then(|| to_secs(packet.duration())),
                    keyframe: packet.is_key(),
                    data: packet.data().map(|d| d.to_vec()).unwrap_or_default(),
                }))
            }
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(ffmpeg::Error::InvalidData) => Err(PlayerError::CorruptPacket(format!(
                "{}: 无效数据",
                self.location
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn seek_to_keyframe(&mut self, time: f64) -> Result<f64> {
        if self.closed {
            return Err(PlayerError::Closed);
        }
        let timestamp = (time * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        self.input.seek(timestamp, ..timestamp)?;
        Ok(time)
    }

    fn video_codec(&self, stream: &StreamInfo) -> Result<Box<dyn VideoCodec>> {
        let context = codec::context::Context::from_parameters(self.parameters(stream)?)?;
        let decoder = context.decoder().video().map_err(|e| {
            PlayerError::UnsupportedCodec(format!("{}: {}", stream.codec.codec_name, e))
        })?;
        debug!(
            "软件解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );
        Ok(Box::new(FfmpegVideoCodec {
            decoder,
            scaler: None,
            time_base: self.time_base(stream.index),
            pending: VecDeque::new(),
            draining: false,
            name: stream.codec.codec_name.clone(),
        }))
    }

    fn surface_codec(&self, stream: &StreamInfo) -> Result<Option<Box<dyn SurfaceCodec>>> {
        let candidates = HwAccelType::platform_candidates();
        // ffmpeg-next 6.1 没有暴露 av_hwdevice_ctx_create，表面输出需要另外的后端
        warn!(
            "流 #{} 可尝试的硬件加速: {:?}，当前后端不支持硬件表面输出",
            stream.index,
            candidates.iter().map(|c| c.name()).collect::<Vec<_>>()
        );
        Ok(None)
    }

    fn audio_codec(&self, stream: &StreamInfo, output: AudioFormat) -> Result<Box<dyn AudioCodec>> {
        let context = codec::context::Context::from_parameters(self.parameters(stream)?)?;
        let decoder = context.decoder().audio().map_err(|e| {
            PlayerError::UnsupportedCodec(format!("{}: {}", stream.codec.codec_name, e))
        })?;
        debug!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );
        Ok(Box::new(FfmpegAudioCodec {
            decoder,
            resampler: None,
            time_base: self.time_base(stream.index),
            output,
            pending: VecDeque::new(),
            draining: false,
            name: stream.codec.codec_name.clone(),
        }))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("释放容器: {}", self.location);
        }
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.location)
    }
}

/// 把管线数据包转换回 FFmpeg 数据包（时间换算回流时间基）
fn to_ffmpeg_packet(packet: &Packet, time_base: f64) -> ffmpeg::Packet {
    let mut out = ffmpeg::Packet::copy(&packet.data);
    let to_ts = |secs: f64| {
        if time_base > 0.0 {
            (secs / time_base).round() as i64
        } else {
            0
        }
    };
    out.set_pts(packet.pts.map(to_ts));
    out.set_dts(packet.dts.map(to_ts));
    if let Some(duration) = packet.duration {
        out.set_duration(to_ts(duration));
    }
    if packet.keyframe {
        out.set_flags(codec::packet::Flags::KEY);
    }
    out
}

/// EAGAIN：解码器需要更多输入，或者输出还没取完
fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno: 11 })
}

/// 软件视频解码器（输出 RGBA）
struct FfmpegVideoCodec {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    time_base: f64,
    /// 一个包可能解出多帧，按顺序暂存
    pending: VecDeque<DecodedPicture>,
    draining: bool,
    name: String,
}

// SwsContext 本身不是 Send，但我们确保只在单个线程中使用它
unsafe impl Send for FfmpegVideoCodec {}

impl FfmpegVideoCodec {
    fn receive_all(&mut self, pool: &mut FramePool) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let picture = self.convert_frame(&decoded, pool)?;
                    self.pending.push_back(picture);
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }
    }

    /// 转换帧格式为 RGBA（平面来自缓冲池）
    fn convert_frame(&mut self, frame: &util::frame::Video, pool: &mut FramePool) -> Result<DecodedPicture> {
        let width = frame.width();
        let height = frame.height();

        if self.scaler.is_none() {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
        }
        let mut rgba = util::frame::Video::empty();
        if let Some(scaler) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgba)?;
        }

        let row_size = width as usize * 4;
        let len = row_size * height as usize;
        let mut data = pool.acquire(
            FrameShape {
                format: PixelFormat::RGBA,
                len,
            },
            len,
        );
        let stride = rgba.stride(0);
        let source = rgba.data(0);
        for y in 0..height as usize {
            data[y * row_size..(y + 1) * row_size]
                .copy_from_slice(&source[y * stride..y * stride + row_size]);
        }

        let timestamp = frame
            .timestamp()
            .or(frame.pts())
            .map(|ts| ts as f64 * self.time_base);

        Ok(DecodedPicture {
            timestamp,
            frame: CpuFrame {
                width,
                height,
                format: PixelFormat::RGBA,
                planes: vec![Plane {
                    data,
                    stride: row_size,
                }],
            },
        })
    }
}

impl VideoCodec for FfmpegVideoCodec {
    fn decode(&mut self, packet: &Packet, pool: &mut FramePool) -> Result<Option<DecodedPicture>> {
        match self.decoder.send_packet(&to_ffmpeg_packet(packet, self.time_base)) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），忽略本次包");
            }
            Err(e) if is_again(&e) => {}
            Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
        }
        self.receive_all(pool)?;
        Ok(self.pending.pop_front())
    }

    fn receive(&mut self, _pool: &mut FramePool) -> Result<Option<DecodedPicture>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self, pool: &mut FramePool) -> Result<Option<DecodedPicture>> {
        if !self.draining {
            self.draining = true;
            if let Err(e) = self.decoder.send_eof() {
                debug!("视频解码器 send_eof: {}", e);
            }
            self.receive_all(pool)?;
        }
        Ok(self.pending.pop_front())
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.pending.clear();
        self.draining = false;
    }

    fn name(&self) -> String {
        format!("ffmpeg/{}", self.name)
    }
}

/// 音频解码器（重采样为交错 f32）
struct FfmpegAudioCodec {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: f64,
    output: AudioFormat,
    pending: VecDeque<DecodedSamples>,
    draining: bool,
    name: String,
}

unsafe impl Send for FfmpegAudioCodec {}

impl FfmpegAudioCodec {
    fn receive_all(&mut self, pool: &mut SamplePool) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let samples = self.convert_frame(&decoded, pool)?;
                    self.pending.push_back(samples);
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }
    }

    fn convert_frame(&mut self, frame: &util::frame::Audio, pool: &mut SamplePool) -> Result<DecodedSamples> {
        if self.resampler.is_none() {
            let target_layout = match self.output.channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.output.sample_rate,
                self.output.channels
            );
            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.output.sample_rate,
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }

        let samples = self.copy_samples(&resampled, pool);
        let timestamp = frame
            .timestamp()
            .or(frame.pts())
            .map(|ts| ts as f64 * self.time_base);
        Ok(DecodedSamples { timestamp, samples })
    }

    /// 交错 f32 字节 → 池化的采样缓冲
    fn copy_samples(&self, resampled: &util::frame::Audio, pool: &mut SamplePool) -> Vec<f32> {
        let channels = self.output.channels;
        let len = resampled.samples() * channels as usize;
        let mut samples = pool.acquire(SampleShape { channels, len }, len);
        let bytes = resampled.data(0);
        for (dst, chunk) in samples.iter_mut().zip(bytes.chunks_exact(4)) {
            *dst = f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        samples
    }

    /// 重采样器的尾部采样没有时间戳，接在上一个缓冲后面
    fn drain_resampler(&mut self, pool: &mut SamplePool) -> Result<()> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(());
        };
        if let Some(tail) = resampler_tail(resampler)? {
            debug!("重采样器尾部 {} 帧", tail.samples());
            let samples = self.copy_samples(&tail, pool);
            self.pending.push_back(DecodedSamples {
                timestamp: None,
                samples,
            });
        }
        Ok(())
    }
}

/// 取出重采样器内部延迟的采样（流结束时调用）
fn resampler_tail(resampler: &mut software::resampling::Context) -> Result<Option<util::frame::Audio>> {
    let delayed = resampler.delay().map(|d| d.output).unwrap_or(0);
    if delayed <= 0 {
        return Ok(None);
    }
    let definition = *resampler.output();
    let mut tail =
        util::frame::Audio::new(definition.format, delayed as usize, definition.channel_layout);
    tail.set_rate(definition.rate);
    resampler.flush(&mut tail)?;
    Ok((tail.samples() > 0).then_some(tail))
}

impl AudioCodec for FfmpegAudioCodec {
    fn output_format(&self) -> AudioFormat {
        self.output
    }

    fn decode(&mut self, packet: &Packet, pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        match self.decoder.send_packet(&to_ffmpeg_packet(packet, self.time_base)) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器收到 EOF（send_packet），忽略本次包");
            }
            Err(e) if is_again(&e) => {}
            Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
        }
        self.receive_all(pool)?;
        Ok(self.pending.pop_front())
    }

    fn receive(&mut self, _pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self, pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        if !self.draining {
            self.draining = true;
            if let Err(e) = self.decoder.send_eof() {
                debug!("音频解码器 send_eof: {}", e);
            }
            self.receive_all(pool)?;
            self.drain_resampler(pool)?;
        }
        Ok(self.pending.pop_front())
    }

    fn reset(&mut self) {
        self.decoder.flush();
        self.pending.clear();
        self.draining = false;
        // 重采样器里残留的是 seek 之前的采样
        self.resampler = None;
    }

    fn name(&self) -> String {
        format!("ffmpeg/{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use util::channel_layout::ChannelLayout;
    use util::format::sample::{Sample, Type};

    #[test]
    fn test_resampler_tail_is_recovered() {
        let format = Sample::F32(Type::Packed);
        let mut resampler = software::resampling::Context::get(
            format,
            ChannelLayout::STEREO,
            44100,
            format,
            ChannelLayout::STEREO,
            48000,
        )
        .unwrap();

        let mut input = util::frame::Audio::new(format, 1024, ChannelLayout::STEREO);
        input.set_rate(44100);
        let mut output = util::frame::Audio::empty();
        resampler.run(&input, &mut output).unwrap();

        // 1024 帧 44.1kHz 约等于 1114 帧 48kHz，第一次输出拿不全
        let tail = resampler_tail(&mut resampler).unwrap().unwrap();
        assert!(tail.samples() > 0);
        assert!(output.samples() + tail.samples() > 1024);
    }

    #[test]
    fn test_eagain_is_recognised() {
        assert!(is_again(&ffmpeg::Error::Other { errno: 11 }));
        assert!(!is_again(&ffmpeg::Error::Eof));
    }
}
