use crate::core::{AudioFormat, FrameData, Packet, Result, StreamInfo};
use crate::player::codec::{
    AudioCodec, DecodedSamples, FramePool, SamplePool, SurfaceCodec, VideoCodec,
};
use crate::player::source::Container;
use log::{info, warn};

/// 视频解码结果（时间戳尚未经过帧节奏处理）
#[derive(Debug)]
pub struct DecodedVideo {
    pub timestamp: Option<f64>,
    pub data: FrameData,
}

/// 视频解码器（支持硬件表面和 CPU 位图两种输出）
///
/// 输出形式在打开流时决定一次，之后不会在流中途切换
pub struct VideoDecoder {
    inner: DecoderType,
}

/// 解码器内部类型
enum DecoderType {
    Hardware(Box<dyn SurfaceCodec>),
    Software(Box<dyn VideoCodec>),
}

impl VideoDecoder {
    /// 为视频流创建解码器（请求硬件加速时优先尝试，失败则回退到软件解码）
    pub fn open(container: &dyn Container, stream: &StreamInfo, want_hardware: bool) -> Result<Self> {
        if want_hardware {
            match container.surface_codec(stream) {
                Ok(Some(codec)) => {
                    info!("✓ 使用硬件解码: {}", codec.name());
                    return Ok(Self::from_hardware(codec));
                }
                Ok(None) => {
                    info!("硬件解码不可用（流 #{}），回退到软件解码", stream.index);
                }
                Err(e) => {
                    warn!("硬件解码初始化失败: {}，回退到软件解码", e);
                }
            }
        }

        let codec = container.video_codec(stream)?;
        info!("✓ 使用软件解码: {}", codec.name());
        Ok(Self::from_software(codec))
    }

    pub fn from_software(codec: Box<dyn VideoCodec>) -> Self {
        Self {
            inner: DecoderType::Software(codec),
        }
    }

    pub fn from_hardware(codec: Box<dyn SurfaceCodec>) -> Self {
        Self {
            inner: DecoderType::Hardware(codec),
        }
    }

    /// 解码数据包
    pub fn decode(&mut self, packet: &Packet, pool: &mut FramePool) -> Result<Option<DecodedVideo>> {
        match &mut self.inner {
            DecoderType::Hardware(codec) => Ok(codec.decode_to_surface(packet)?.map(|s| DecodedVideo {
                timestamp: s.timestamp,
                data: FrameData::Hardware(s.handle),
            })),
            DecoderType::Software(codec) => Ok(codec.decode(packet, pool)?.map(|p| DecodedVideo {
                timestamp: p.timestamp,
                data: FrameData::Cpu(p.frame),
            })),
        }
    }

    /// 取出当前包解出的下一帧
    pub fn receive(&mut self, pool: &mut FramePool) -> Result<Option<DecodedVideo>> {
        match &mut self.inner {
            DecoderType::Hardware(codec) => Ok(codec.receive()?.map(|s| DecodedVideo {
                timestamp: s.timestamp,
                data: FrameData::Hardware(s.handle),
            })),
            DecoderType::Software(codec) => Ok(codec.receive(pool)?.map(|p| DecodedVideo {
                timestamp: p.timestamp,
                data: FrameData::Cpu(p.frame),
            })),
        }
    }

    /// 刷新解码器（无新输入，取出一帧缓冲的帧）
    pub fn flush(&mut self, pool: &mut FramePool) -> Result<Option<DecodedVideo>> {
        match &mut self.inner {
            DecoderType::Hardware(codec) => Ok(codec.flush()?.map(|s| DecodedVideo {
                timestamp: s.timestamp,
                data: FrameData::Hardware(s.handle),
            })),
            DecoderType::Software(codec) => Ok(codec.flush(pool)?.map(|p| DecodedVideo {
                timestamp: p.timestamp,
                data: FrameData::Cpu(p.frame),
            })),
        }
    }

    pub fn reset(&mut self) {
        match &mut self.inner {
            DecoderType::Hardware(codec) => codec.reset(),
            DecoderType::Software(codec) => codec.reset(),
        }
    }

    /// 获取解码器类型信息
    pub fn info(&self) -> String {
        match &self.inner {
            DecoderType::Hardware(codec) => format!("硬件解码 ({})", codec.name()),
            DecoderType::Software(codec) => format!("软件解码 ({})", codec.name()),
        }
    }

    /// 是否使用硬件加速
    pub fn is_hardware_accelerated(&self) -> bool {
        matches!(self.inner, DecoderType::Hardware(_))
    }
}

/// 音频解码器
pub struct AudioDecoder {
    codec: Box<dyn AudioCodec>,
    format: AudioFormat,
}

impl AudioDecoder {
    /// 为音频流创建解码器（指定目标输出格式）
    pub fn open(container: &dyn Container, stream: &StreamInfo, output: AudioFormat) -> Result<Self> {
        let codec = container.audio_codec(stream, output)?;
        info!(
            "音频解码器: {} ({} Hz, {} 声道 → {} Hz, {} 声道)",
            codec.name(),
            stream.codec.sample_rate,
            stream.codec.channels,
            codec.output_format().sample_rate,
            codec.output_format().channels
        );
        Ok(Self::from_codec(codec))
    }

    pub fn from_codec(codec: Box<dyn AudioCodec>) -> Self {
        let format = codec.output_format();
        Self { codec, format }
    }

    pub fn decode(&mut self, packet: &Packet, pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        self.codec.decode(packet, pool)
    }

    pub fn receive(&mut self, pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        self.codec.receive(pool)
    }

    pub fn flush(&mut self, pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        self.codec.flush(pool)
    }

    pub fn reset(&mut self) {
        self.codec.reset()
    }

    pub fn output_format(&self) -> AudioFormat {
        self.format
    }

    pub fn info(&self) -> String {
        self.codec.name()
    }
}
