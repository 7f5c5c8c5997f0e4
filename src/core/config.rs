use crate::core::{AudioFormat, PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 管线配置
///
/// 队列容量默认值沿用播放器的经验值：
/// 视频 200 packets ≈ 8 秒（25fps），音频 150 packets ≈ 3 秒（48kHz）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub video_packet_capacity: usize,
    pub audio_packet_capacity: usize,
    /// 已解码视频帧队列容量（背压点）
    pub video_frame_capacity: usize,
    /// 已解码音频缓冲队列容量
    pub audio_frame_capacity: usize,
    /// Seek 容差 ε（秒），None 时取半帧时长
    pub seek_tolerance: Option<f64>,
    /// 连续解码失败多少次后上报流降级
    pub degraded_after: u32,
    /// 每种形状最多缓存的空闲缓冲数
    pub pool_max_per_shape: usize,
    /// 音频解码输出格式
    pub audio_output: AudioFormat,
    /// 标称帧率（启用后按 last + 1/fps 推算时间戳）
    pub nominal_frame_rate: Option<f64>,
    /// 视频流没有声明帧率时假定的帧率
    pub fallback_frame_rate: f64,
    /// 解封装线程在背压时、解码线程在输入为空时检查命令的间隔（毫秒）
    pub demux_poll_interval_ms: u64,
    /// get_frame_for_time 等待新帧的最长时间（毫秒）
    pub frame_wait_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            video_packet_capacity: 200,
            audio_packet_capacity: 150,
            video_frame_capacity: 8,
            audio_frame_capacity: 32,
            seek_tolerance: None,
            degraded_after: 8,
            pool_max_per_shape: 4,
            audio_output: AudioFormat::default(),
            nominal_frame_rate: None,
            fallback_frame_rate: 25.0,
            demux_poll_interval_ms: 20,
            frame_wait_timeout_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("video_packet_capacity", self.video_packet_capacity),
            ("audio_packet_capacity", self.audio_packet_capacity),
            ("video_frame_capacity", self.video_frame_capacity),
            ("audio_frame_capacity", self.audio_frame_capacity),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(PlayerError::ConfigError(format!("{} 必须大于 0", name)));
            }
        }
        if let Some(eps) = self.seek_tolerance {
            if !eps.is_finite() || eps < 0.0 {
                return Err(PlayerError::ConfigError(format!(
                    "seek_tolerance 无效: {}",
                    eps
                )));
            }
        }
        if let Some(fps) = self.nominal_frame_rate {
            if !fps.is_finite() || fps < 0.0 {
                return Err(PlayerError::ConfigError(format!(
                    "nominal_frame_rate 无效: {}",
                    fps
                )));
            }
        }
        if !self.fallback_frame_rate.is_finite() || self.fallback_frame_rate <= 0.0 {
            return Err(PlayerError::ConfigError(format!(
                "fallback_frame_rate 无效: {}",
                self.fallback_frame_rate
            )));
        }
        if self.audio_output.sample_rate == 0 || self.audio_output.channels == 0 {
            return Err(PlayerError::ConfigError(format!(
                "音频输出格式无效: {} Hz, {} 声道",
                self.audio_output.sample_rate, self.audio_output.channels
            )));
        }
        if self.degraded_after == 0 {
            return Err(PlayerError::ConfigError("degraded_after 必须大于 0".into()));
        }
        Ok(())
    }

    pub fn demux_poll_interval(&self) -> Duration {
        Duration::from_millis(self.demux_poll_interval_ms.max(1))
    }

    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }

    /// 0 表示关闭标称帧率
    pub fn nominal_fps(&self) -> Option<f64> {
        self.nominal_frame_rate.filter(|fps| *fps > 0.0)
    }
}

/// open 时的选项
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOptions {
    pub want_hardware_accel: bool,
    pub want_audio: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            want_hardware_accel: false,
            want_audio: true,
        }
    }
}
