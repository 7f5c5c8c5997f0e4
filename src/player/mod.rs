// 解码管线核心模块

pub mod source;
pub mod codec;
pub mod demuxer;
pub mod demuxer_thread;  // Demuxer 线程管理
pub mod decoder;
pub mod worker;          // 通用解码线程（状态机 + seek 协议）
pub mod video_worker;
pub mod audio_worker;
pub mod coordinator;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_backend;

pub use source::{Container, MediaBackend};
pub use codec::{AudioCodec, SurfaceCodec, VideoCodec};
pub use demuxer::{Demuxer, PacketQueue};
pub use demuxer_thread::{DemuxerCommand, DemuxerThread};
pub use decoder::{AudioDecoder, VideoDecoder};
pub use worker::{WorkerCommand, WorkerHandle, WorkerStats};
pub use video_worker::FrameRecycler;
pub use audio_worker::AudioRecycler;
pub use coordinator::PipelineCoordinator;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg_backend::{FfmpegBackend, HwAccelType};
