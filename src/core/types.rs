use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 媒体源类型
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> Self {
        let protocol = if url.starts_with("rtsp://") {
            Some(StreamProtocol::RTSP)
        } else if url.starts_with("rtmp://") {
            Some(StreamProtocol::RTMP)
        } else if url.ends_with(".m3u8") || url.contains("/hls/") {
            Some(StreamProtocol::HLS)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Some(StreamProtocol::HTTP)
        } else {
            None
        };

        match protocol {
            Some(protocol) => MediaSource::NetworkStream {
                url: url.to_string(),
                protocol,
            },
            // 默认当作本地文件
            None => MediaSource::LocalFile(PathBuf::from(url)),
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream { .. })
    }

    /// 用于日志和 FFmpeg 打开的路径/URL 字符串
    pub fn location(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().to_string(),
            MediaSource::NetworkStream { url, .. } => url.clone(),
        }
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流
    HTTP,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
        }
    }
}

/// 流的媒体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Data,
}

/// 编解码参数（容器打开时探测得到）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecParameters {
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    /// 容器声明的标称帧率
    pub frame_rate: Option<f64>,
    /// 容器是否声明帧率可信
    pub frame_rate_reliable: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

/// 容器中的一条流
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: CodecParameters,
    /// 流时长（秒）
    pub duration: Option<f64>,
}

impl StreamInfo {
    /// 一帧的时长（秒），帧率未知时返回 None
    pub fn frame_period(&self) -> Option<f64> {
        self.codec
            .frame_rate
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| 1.0 / fps)
    }
}

/// 压缩数据包（不可变，由解封装器产生，经队列移交给唯一的解码线程）
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub stream_index: usize,
    /// 解码时间戳（秒）
    pub dts: Option<f64>,
    /// 显示时间戳（秒）
    pub pts: Option<f64>,
    pub duration: Option<f64>,
    pub keyframe: bool,
    pub data: Vec<u8>,
}

impl Packet {
    pub fn new(stream_index: usize, data: Vec<u8>) -> Self {
        Self {
            stream_index,
            dts: None,
            pts: None,
            duration: None,
            keyframe: false,
            data,
        }
    }

    pub fn with_timestamps(mut self, pts: Option<f64>, dts: Option<f64>) -> Self {
        self.pts = pts;
        self.dts = dts;
        self
    }

    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    /// 优先 PTS，缺失时退回 DTS
    pub fn timestamp(&self) -> Option<f64> {
        self.pts.or(self.dts)
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

/// 一个 CPU 平面
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// CPU 位图帧
#[derive(Debug, Clone, PartialEq)]
pub struct CpuFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

/// 硬件解码表面的不透明句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

/// 帧数据：CPU 位图或硬件表面，二选一
///
/// 每条流在打开时决定一次，之后不会在流中途切换
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    Cpu(CpuFrame),
    Hardware(SurfaceHandle),
}

impl FrameData {
    pub fn is_hardware(&self) -> bool {
        matches!(self, FrameData::Hardware(_))
    }
}

/// 解码后的视频帧
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// 显示时间（秒）
    pub time: f64,
    pub data: FrameData,
}

/// 音频输出格式（解码器重采样的目标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// 解码后的音频缓冲（交错 f32 采样）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// 首个采样的显示时间（秒）
    pub time: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFrame {
    /// 采样帧数（每声道采样数）
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    /// 缓冲时长（秒）
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frame_count() as f64 / self.sample_rate as f64
        }
    }

    /// 最后一个采样之后的时间
    pub fn end_time(&self) -> f64 {
        self.time + self.duration()
    }
}

/// 视频帧缓冲池的形状键（像素格式 × 字节长度）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub format: PixelFormat,
    pub len: usize,
}

/// 音频缓冲池的形状键（声道数 × 采样长度）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleShape {
    pub channels: u16,
    pub len: usize,
}

/// 管线消息：任意队列中流转的带标签变体
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineMessage<T> {
    /// 数据负载（输入队列中是数据包，输出队列中是视频帧/音频缓冲）
    Data(T),
    EndOfStream,
    /// Seek 同步哨兵
    SeekDone { seq: u64, time: f64 },
    Closed,
    Error(String),
}

impl<T> PipelineMessage<T> {
    pub fn is_data(&self) -> bool {
        matches!(self, PipelineMessage::Data(_))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PipelineMessage::Data(_) => "Data",
            PipelineMessage::EndOfStream => "EndOfStream",
            PipelineMessage::SeekDone { .. } => "SeekDone",
            PipelineMessage::Closed => "Closed",
            PipelineMessage::Error(_) => "Error",
        }
    }
}

/// 解码线程的流状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Decoding,
    SeekPending,
    Discarding,
    Draining,
    Closed,
}

/// get_frame_for_time 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum FrameResult {
    NewFrame(VideoFrame),
    ReuseLastFrame,
}

/// is_end_of_stream 的查询对象
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSelector {
    Video,
    Audio,
    All,
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferStatus {
    /// 视频数据包队列长度
    pub video_packets: usize,

    /// 音频数据包队列长度
    pub audio_packets: usize,

    /// 视频帧队列长度
    pub video_frames: usize,

    /// 音频缓冲队列长度
    pub audio_frames: usize,

    /// 是否正在缓冲（解码中但还没有可用的视频帧）
    pub is_buffering: bool,
}

/// 视频流信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub stream_index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub codec: String,
    /// 是否启用了硬件表面解码
    pub hardware_accelerated: bool,
}

/// 音频流信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub stream_index: usize,
    pub codec: String,
    /// 源采样率
    pub sample_rate: u32,
    pub channels: u16,
    /// 解码输出格式
    pub output: AudioFormat,
}

/// 媒体信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// 总时长（秒）
    pub duration: Option<f64>,
    pub streams: Vec<StreamInfo>,
    pub video: Option<VideoInfo>,
    pub audio: Option<AudioInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_from_url() {
        assert_eq!(
            MediaSource::from_url("rtsp://cam/live"),
            MediaSource::NetworkStream {
                url: "rtsp://cam/live".into(),
                protocol: StreamProtocol::RTSP
            }
        );
        assert!(matches!(
            MediaSource::from_url("https://cdn/x/index.m3u8"),
            MediaSource::NetworkStream { protocol: StreamProtocol::HLS, .. }
        ));
        assert_eq!(
            MediaSource::from_url("/tmp/a.mkv"),
            MediaSource::LocalFile(PathBuf::from("/tmp/a.mkv"))
        );
        assert!(!MediaSource::from_url("a.mp4").is_network_stream());
    }

    #[test]
    fn test_audio_frame_timing() {
        let frame = AudioFrame {
            time: 3.0,
            sample_rate: 48000,
            channels: 2,
            samples: vec![0.0; 960 * 2],
        };
        assert_eq!(frame.frame_count(), 960);
        assert!((frame.duration() - 0.02).abs() < 1e-9);
        assert!((frame.end_time() - 3.02).abs() < 1e-9);
    }

    #[test]
    fn test_frame_period() {
        let mut stream = StreamInfo {
            index: 0,
            kind: MediaKind::Video,
            codec: CodecParameters {
                frame_rate: Some(25.0),
                ..Default::default()
            },
            duration: None,
        };
        assert_eq!(stream.frame_period(), Some(0.04));
        stream.codec.frame_rate = Some(0.0);
        assert_eq!(stream.frame_period(), None);
    }
}
