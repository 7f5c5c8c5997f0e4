use crate::core::{
    AudioFormat, BufferPool, CpuFrame, FrameShape, Packet, Result, SampleShape, SurfaceHandle,
};

/// 视频帧缓冲池
pub type FramePool = BufferPool<FrameShape, u8>;

/// 音频采样缓冲池
pub type SamplePool = BufferPool<SampleShape, f32>;

/// CPU 解码输出
#[derive(Debug)]
pub struct DecodedPicture {
    /// 容器时间戳（秒），可能缺失
    pub timestamp: Option<f64>,
    pub frame: CpuFrame,
}

/// 硬件表面解码输出
#[derive(Debug)]
pub struct DecodedSurface {
    pub timestamp: Option<f64>,
    pub handle: SurfaceHandle,
}

/// 音频解码输出（已重采样为 `output_format` 的交错 f32）
#[derive(Debug)]
pub struct DecodedSamples {
    pub timestamp: Option<f64>,
    pub samples: Vec<f32>,
}

/// 单条视频流的有状态解码器
///
/// 解码器可能有若干包的内部延迟：`decode` 返回 None 不代表丢帧，
/// 流结束后反复调用 `flush` 直到返回 None 取出剩余帧。
/// 一个包解出多帧时，`decode` 返回第一帧，其余帧由 `receive` 逐个取出
pub trait VideoCodec: Send {
    fn decode(&mut self, packet: &Packet, pool: &mut FramePool) -> Result<Option<DecodedPicture>>;

    fn receive(&mut self, _pool: &mut FramePool) -> Result<Option<DecodedPicture>> {
        Ok(None)
    }

    fn flush(&mut self, pool: &mut FramePool) -> Result<Option<DecodedPicture>>;

    /// 丢弃内部缓冲（seek 后调用）
    fn reset(&mut self);

    fn name(&self) -> String;
}

/// 硬件表面解码器
pub trait SurfaceCodec: Send {
    fn decode_to_surface(&mut self, packet: &Packet) -> Result<Option<DecodedSurface>>;

    fn receive(&mut self) -> Result<Option<DecodedSurface>> {
        Ok(None)
    }

    fn flush(&mut self) -> Result<Option<DecodedSurface>>;

    fn reset(&mut self);

    fn name(&self) -> String;
}

/// 单条音频流的有状态解码器
pub trait AudioCodec: Send {
    fn output_format(&self) -> AudioFormat;

    fn decode(&mut self, packet: &Packet, pool: &mut SamplePool) -> Result<Option<DecodedSamples>>;

    /// 同一个包解出的后续缓冲
    fn receive(&mut self, _pool: &mut SamplePool) -> Result<Option<DecodedSamples>> {
        Ok(None)
    }

    fn flush(&mut self, pool: &mut SamplePool) -> Result<Option<DecodedSamples>>;

    fn reset(&mut self);

    fn name(&self) -> String;
}
