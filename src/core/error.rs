use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    /// 容器无法打开或无法解析（致命，open 同步返回）
    #[error("无法打开容器: {0}")]
    ContainerOpen(String),

    /// 编解码器不支持或初始化失败（致命，open 同步返回）
    #[error("不支持的编解码器: {0}")]
    UnsupportedCodec(String),

    #[error("没有可解码的音视频流")]
    NoDecodableStreams,

    /// 损坏的数据包（可恢复：跳过并记录警告）
    #[error("损坏的数据包: {0}")]
    CorruptPacket(String),

    /// 单个数据包解码失败（可恢复：丢弃后继续）
    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("管线已关闭")]
    Closed,

    #[error("状态错误: {0}")]
    InvalidState(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl PlayerError {
    /// 是否只影响单个数据包/帧（不会终止整条流）
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PlayerError::CorruptPacket(_) | PlayerError::DecodeError(_))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
