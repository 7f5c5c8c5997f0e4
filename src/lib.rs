//! 异步媒体解码管线
//!
//! 一个 Demuxer 线程把数据包分发到每条流的有界队列，每条流一个解码线程，
//! 协调者（`PipelineCoordinator`）在调用方线程按时间取帧、发起 seek。

pub mod core;
pub mod player;

pub use crate::core::{
    FrameResult, MediaInfo, MediaSource, OpenOptions, PipelineConfig, PlayerError, Result,
    StreamSelector,
};
pub use crate::player::PipelineCoordinator;
