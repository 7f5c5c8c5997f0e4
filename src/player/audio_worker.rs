use crate::core::{
    AudioFormat, AudioFrame, BufferRecycler, Packet, PipelineConfig, Result, SampleShape,
};
use crate::player::codec::{DecodedSamples, SamplePool};
use crate::player::decoder::AudioDecoder;
use crate::player::worker::{SeekResolution, StreamProcessor};
use log::{debug, info};

/// 把播放完的音频缓冲还给解码线程的缓冲池
#[derive(Clone)]
pub struct AudioRecycler {
    inner: BufferRecycler<SampleShape, f32>,
}

impl AudioRecycler {
    pub fn recycle(&self, frame: AudioFrame) {
        let shape = SampleShape {
            channels: frame.channels,
            len: frame.samples.len(),
        };
        self.inner.recycle(shape, frame.samples);
    }
}

/// 音频流处理：解码、补齐缺失时间戳、seek 时补静音或裁剪头部
pub struct AudioProcessor {
    decoder: AudioDecoder,
    pool: SamplePool,
    format: AudioFormat,
    /// 上一个缓冲结束的时间（缺失时间戳时接着用）
    next_time: Option<f64>,
    last_start: Option<f64>,
    anchor: Option<f64>,
}

impl AudioProcessor {
    pub fn new(decoder: AudioDecoder, config: &PipelineConfig) -> Self {
        let format = decoder.output_format();
        info!(
            "音频处理: {}，输出 {} Hz / {} 声道",
            decoder.info(),
            format.sample_rate,
            format.channels
        );
        Self {
            decoder,
            pool: SamplePool::new(config.pool_max_per_shape),
            format,
            next_time: None,
            last_start: None,
            anchor: None,
        }
    }

    pub fn recycler(&self) -> AudioRecycler {
        AudioRecycler {
            inner: self.pool.recycler(),
        }
    }

    pub fn output_format(&self) -> AudioFormat {
        self.format
    }

    fn to_frame(&mut self, decoded: DecodedSamples) -> AudioFrame {
        let mut time = decoded
            .timestamp
            .or(self.next_time)
            .or(self.anchor)
            .unwrap_or(0.0);
        if let Some(last) = self.last_start {
            time = time.max(last);
        }
        let frame = AudioFrame {
            time,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            samples: decoded.samples,
        };
        self.last_start = Some(time);
        self.next_time = Some(frame.end_time());
        frame
    }

    fn release(&mut self, frame: AudioFrame) {
        let shape = SampleShape {
            channels: frame.channels,
            len: frame.samples.len(),
        };
        self.pool.release(shape, frame.samples);
    }

    /// 生成 `frames` 帧静音，时间为 `time`
    fn silence(&mut self, time: f64, frames: usize) -> AudioFrame {
        let channels = self.format.channels;
        let len = frames * channels as usize;
        AudioFrame {
            time,
            sample_rate: self.format.sample_rate,
            channels,
            samples: self.pool.acquire_zeroed(SampleShape { channels, len }, len),
        }
    }

    /// 丢掉头部 `frames` 帧
    fn trim_head(&mut self, frame: AudioFrame, frames: usize) -> AudioFrame {
        let channels = frame.channels;
        let skip = (frames * channels as usize).min(frame.samples.len());
        let len = frame.samples.len() - skip;
        let mut samples = self.pool.acquire(SampleShape { channels, len }, len);
        samples.copy_from_slice(&frame.samples[skip..]);
        let time = frame.time + frames as f64 / frame.sample_rate as f64;
        self.release(frame);
        AudioFrame {
            time,
            sample_rate: self.format.sample_rate,
            channels,
            samples,
        }
    }
}

impl StreamProcessor for AudioProcessor {
    type Output = AudioFrame;

    fn label(&self) -> &'static str {
        "audio"
    }

    fn decode(&mut self, packet: &Packet) -> Result<Option<AudioFrame>> {
        let decoded = self.decoder.decode(packet, &mut self.pool)?;
        Ok(decoded.map(|d| self.to_frame(d)))
    }

    fn receive(&mut self) -> Result<Option<AudioFrame>> {
        let decoded = self.decoder.receive(&mut self.pool)?;
        Ok(decoded.map(|d| self.to_frame(d)))
    }

    fn flush(&mut self) -> Result<Option<AudioFrame>> {
        let decoded = self.decoder.flush(&mut self.pool)?;
        Ok(decoded.map(|d| self.to_frame(d)))
    }

    fn reset(&mut self, anchor: Option<f64>) {
        self.decoder.reset();
        self.next_time = None;
        self.last_start = None;
        self.anchor = anchor;
    }

    /// 缓冲起点 s、时长 d、目标 t（容差半个采样）：
    /// - s+d ≤ t：整块在目标之前，丢弃
    /// - s-t > d：目标和第一块之间空了一个缓冲以上，补 s-t 的静音
    /// - s < t：裁掉头部到 t
    /// - 其余：以 s 完成
    fn resolve_seek(&mut self, target: f64, frame: AudioFrame) -> SeekResolution<AudioFrame> {
        let rate = frame.sample_rate.max(1) as f64;
        let epsilon = 0.5 / rate;
        let start = frame.time;
        let duration = frame.duration();

        if start + duration <= target + epsilon {
            self.release(frame);
            return SeekResolution::Discard;
        }

        if start - target > duration {
            let gap = ((start - target) * rate).round() as usize;
            debug!("音频 seek 补静音 {} 帧（{:.3}s → {:.3}s）", gap, target, start);
            let silence = self.silence(target, gap);
            return SeekResolution::Done {
                achieved: target,
                outputs: vec![silence, frame],
            };
        }

        if start < target - epsilon {
            let frames = ((target - start) * rate).round() as usize;
            let trimmed = self.trim_head(frame, frames);
            return SeekResolution::Done {
                achieved: trimmed.time,
                outputs: vec![trimmed],
            };
        }

        SeekResolution::Done {
            achieved: start,
            outputs: vec![frame],
        }
    }

    fn discard(&mut self, frame: AudioFrame) {
        self.release(frame);
    }
}
