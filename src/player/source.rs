use crate::core::{AudioFormat, MediaSource, Packet, Result, StreamInfo};
use crate::player::codec::{AudioCodec, SurfaceCodec, VideoCodec};

/// 媒体后端：负责全局初始化和打开容器
///
/// 不同的实现（FFmpeg、测试用的脚本化后端等）都实现这个接口
pub trait MediaBackend: Send + Sync {
    fn name(&self) -> &str;

    /// 进程级一次性初始化（解码库注册表等），由第一次打开容器时惰性调用
    fn ensure_initialized(&self) -> Result<()> {
        Ok(())
    }

    /// 打开媒体源
    ///
    /// 返回：
    /// - Ok(container): 打开成功，流信息可用
    /// - Err(ContainerOpen): 无法解析
    fn open_container(&self, source: &MediaSource) -> Result<Box<dyn Container>>;
}

/// 已打开的容器（Container Handle）
///
/// 打开一次、关闭一次；关闭后由 Demuxer 保证不再使用
pub trait Container: Send {
    /// 打开时探测到的全部流
    fn streams(&self) -> &[StreamInfo];

    /// 总时长（秒）
    fn duration(&self) -> Option<f64>;

    /// 读取下一个交错数据包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达末尾
    /// - Err(CorruptPacket): 损坏的包，调用方跳过后可以继续读
    /// - Err(e): 其他读取错误
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// 把读取位置移动到 `time` 之前（含）最近的关键帧，返回实际位置
    fn seek_to_keyframe(&mut self, time: f64) -> Result<f64>;

    /// 为视频流创建 CPU 解码器
    fn video_codec(&self, stream: &StreamInfo) -> Result<Box<dyn VideoCodec>>;

    /// 为视频流创建硬件表面解码器，不支持时返回 Ok(None)
    fn surface_codec(&self, _stream: &StreamInfo) -> Result<Option<Box<dyn SurfaceCodec>>> {
        Ok(None)
    }

    /// 为音频流创建解码器，输出重采样到 `output`
    fn audio_codec(&self, stream: &StreamInfo, output: AudioFormat) -> Result<Box<dyn AudioCodec>>;

    /// 释放容器资源
    fn close(&mut self);

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
