use crate::core::{
    log_ctx, BufferRecycler, FrameData, FrameShape, Packet, PipelineConfig, Result, StreamInfo,
    VideoFrame,
};
use crate::player::codec::FramePool;
use crate::player::decoder::{DecodedVideo, VideoDecoder};
use crate::player::worker::{SeekResolution, StreamProcessor};
use log::info;

/// 把用完的视频帧平面还给解码线程的缓冲池
#[derive(Clone)]
pub struct FrameRecycler {
    inner: BufferRecycler<FrameShape, u8>,
}

impl FrameRecycler {
    pub fn recycle(&self, frame: VideoFrame) {
        // 硬件表面由后端自己管理
        if let FrameData::Cpu(cpu) = frame.data {
            for plane in cpu.planes {
                let shape = FrameShape {
                    format: cpu.format,
                    len: plane.data.len(),
                };
                self.inner.recycle(shape, plane.data);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.pending()
    }
}

/// 视频流处理：解码、帧节奏（时间戳推算）、seek 判定
pub struct VideoProcessor {
    decoder: VideoDecoder,
    pool: FramePool,
    /// 一帧的时长（流声明的帧率，或者回退帧率）
    frame_period: f64,
    /// 标称帧率（启用时 time = last + 1/fps）
    nominal_fps: Option<f64>,
    /// 容器声明的帧率是否可靠（恒定帧率）
    rate_reliable: bool,
    seek_tolerance: f64,
    last_time: Option<f64>,
    anchor: Option<f64>,
}

impl VideoProcessor {
    pub fn new(decoder: VideoDecoder, stream: &StreamInfo, config: &PipelineConfig) -> Self {
        let frame_period = stream
            .frame_period()
            .unwrap_or(1.0 / config.fallback_frame_rate);
        let seek_tolerance = config.seek_tolerance.unwrap_or(frame_period / 2.0);
        info!(
            "视频处理: {}，帧时长 {:.4}s，seek 容差 {:.4}s",
            decoder.info(),
            frame_period,
            seek_tolerance
        );
        Self {
            decoder,
            pool: FramePool::new(config.pool_max_per_shape),
            frame_period,
            nominal_fps: config.nominal_fps(),
            rate_reliable: stream.codec.frame_rate_reliable,
            seek_tolerance,
            last_time: None,
            anchor: None,
        }
    }

    pub fn recycler(&self) -> FrameRecycler {
        FrameRecycler {
            inner: self.pool.recycler(),
        }
    }

    pub fn frame_period(&self) -> f64 {
        self.frame_period
    }

    pub fn seek_tolerance(&self) -> f64 {
        self.seek_tolerance
    }

    pub fn nominal_fps(&self) -> Option<f64> {
        self.nominal_fps
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.decoder.is_hardware_accelerated()
    }

    /// 帧节奏：帧率可靠时 open/seek 后第一帧信任容器时间戳，
    /// 帧率不可靠且启用标称帧率时第一帧对齐到 1/fps 的网格；
    /// 之后启用标称帧率时按 last + 1/fps 推算，缺失时间戳按 last + 帧时长补齐
    fn stamp(&mut self, timestamp: Option<f64>) -> f64 {
        let time = match (self.last_time, timestamp, self.nominal_fps) {
            (None, Some(t), Some(fps)) if !self.rate_reliable => (t * fps).round() / fps,
            (None, Some(t), _) => t,
            (None, None, _) => self.anchor.unwrap_or(0.0),
            (Some(last), _, Some(fps)) => last + 1.0 / fps,
            (Some(last), Some(t), None) => t.max(last),
            (Some(last), None, None) => last + self.frame_period,
        };
        self.last_time = Some(time);
        time
    }

    fn to_frame(&mut self, decoded: DecodedVideo) -> VideoFrame {
        let time = self.stamp(decoded.timestamp);
        VideoFrame {
            time,
            data: decoded.data,
        }
    }

    fn release(&mut self, frame: VideoFrame) {
        if let FrameData::Cpu(cpu) = frame.data {
            for plane in cpu.planes {
                let shape = FrameShape {
                    format: cpu.format,
                    len: plane.data.len(),
                };
                self.pool.release(shape, plane.data);
            }
        }
    }
}

impl StreamProcessor for VideoProcessor {
    type Output = VideoFrame;

    fn label(&self) -> &'static str {
        "video"
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<VideoFrame>> {
        let decoded = self.decoder.decode(packet, &mut self.pool)?;
        Ok(decoded.map(|d| self.to_frame(d)))
    }

    fn receive(&mut self) -> Result<Option<VideoFrame>> {
        let decoded = self.decoder.receive(&mut self.pool)?;
        Ok(decoded.map(|d| self.to_frame(d)))
    }

    fn flush(&mut self) -> Result<Option<VideoFrame>> {
        let decoded = self.decoder.flush(&mut self.pool)?;
        Ok(decoded.map(|d| self.to_frame(d)))
    }

    fn reset(&mut self, anchor: Option<f64>) {
        self.decoder.reset();
        self.last_time = None;
        self.anchor = anchor;
    }

    /// |t'-t| < ε 或 t' > t+ε：以 t' 完成；t' < t-ε：丢弃继续解码
    fn resolve_seek(&mut self, target: f64, frame: VideoFrame) -> SeekResolution<VideoFrame> {
        if frame.time < target - self.seek_tolerance {
            self.release(frame);
            return SeekResolution::Discard;
        }
        SeekResolution::Done {
            achieved: frame.time,
            outputs: vec![frame],
        }
    }

    fn discard(&mut self, frame: VideoFrame) {
        self.release(frame);
    }

    fn set_nominal_frame_rate(&mut self, fps: Option<f64>) {
        match fps {
            Some(fps) => info!("{} 视频启用标称帧率 {:.3} fps", log_ctx(), fps),
            None => info!("{} 视频恢复使用容器时间戳", log_ctx()),
        }
        self.nominal_fps = fps;
    }
}
