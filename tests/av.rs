mod common;

use common::{init_logger, Synthetic, SyntheticBackend};
use myy_pipeline::core::MediaKind;
use myy_pipeline::{
    FrameResult, MediaSource, OpenOptions, PipelineConfig, PipelineCoordinator, StreamSelector,
};
use std::thread;
use std::time::{Duration, Instant};

/// 模拟播放循环中的一步：按时钟取视频帧，再按时钟拉音频
struct Playback {
    now: f64,
    frames: Vec<f64>,
    audio: Vec<f32>,
    buffer: Vec<f32>,
}

impl Playback {
    fn new() -> Self {
        Self {
            now: 0.0,
            frames: Vec::new(),
            audio: Vec::new(),
            buffer: vec![0.0f32; 48000 * 2],
        }
    }

    fn step(&mut self, pipeline: &mut PipelineCoordinator) {
        let started = Instant::now();
        let result = pipeline.get_frame_for_time(self.now).unwrap();
        // 音频按时钟消费时，视频不会因为音频队列堵住而等满超时
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "get_frame_for_time({:.3}) 阻塞了 {:?}，状态 {:?}",
            self.now,
            started.elapsed(),
            pipeline.buffer_status()
        );
        if let FrameResult::NewFrame(frame) = result {
            self.frames.push(frame.time);
            pipeline.recycle_frame(frame);
        }

        let due = pipeline.audio_samples_due(self.now).min(self.buffer.len());
        let n = pipeline.fill_audio_buffer(&mut self.buffer[..due]);
        self.audio.extend_from_slice(&self.buffer[..n]);

        self.now += 1.0 / 30.0;
    }
}

#[test]
fn test_video_and_audio_play_together_through_seek() {
    init_logger();
    let backend = SyntheticBackend::new(Synthetic {
        duration: 7.0,
        audio: true,
        ..Default::default()
    });
    let mut pipeline = PipelineCoordinator::open(
        &backend,
        &MediaSource::from_url("movie.mp4"),
        OpenOptions {
            want_audio: true,
            ..Default::default()
        },
        PipelineConfig::default(),
    )
    .unwrap();
    assert!(pipeline.media_info().video.is_some());
    assert!(pipeline.media_info().audio.is_some());
    pipeline.start_decoding().unwrap();

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut playback = Playback::new();
    while playback.now < 2.0 {
        assert!(Instant::now() < deadline);
        playback.step(&mut pipeline);
    }
    assert!(playback.frames.len() >= 55);
    assert!(playback.frames.windows(2).all(|w| w[0] < w[1]));
    // 解码线程稍微落后时补拉，音频跟上时钟
    while pipeline.audio_samples_due(2.0) > 0 {
        assert!(Instant::now() < deadline);
        let due = pipeline.audio_samples_due(2.0).min(playback.buffer.len());
        let n = pipeline.fill_audio_buffer(&mut playback.buffer[..due]);
        playback.audio.extend_from_slice(&playback.buffer[..n]);
        if n == 0 {
            thread::sleep(Duration::from_millis(2));
        }
    }
    assert!((pipeline.audio_time() - 2.0).abs() < 1e-4);
    assert!(playback.audio.iter().all(|s| *s == 0.5));

    pipeline.seek(5.0).unwrap();
    assert_eq!(pipeline.audio_time(), 5.0);
    let mut playback = Playback {
        now: 5.0,
        ..Playback::new()
    };
    while !pipeline.is_end_of_stream(StreamSelector::All) {
        assert!(Instant::now() < deadline, "播放超时，状态 {:?}", pipeline.buffer_status());
        playback.step(&mut pipeline);
    }

    // seek 之后的第一帧正好是 5.0，之后按顺序播到最后一帧
    assert_eq!(playback.frames.first().copied(), Some(5.0));
    assert!(playback.frames.windows(2).all(|w| w[0] < w[1]));
    assert!((playback.frames.last().copied().unwrap() - 209.0 / 30.0).abs() < 1e-9);

    // 音频从 5.0 接着播，没有插入静音，一直到流末尾
    assert_eq!(playback.audio.len(), 2 * 48000 * 2);
    assert!(playback.audio.iter().all(|s| *s == 0.5));
    assert!((pipeline.audio_time() - 7.0).abs() < 1e-6);
    assert!(pipeline.is_end_of_stream(StreamSelector::Video));
    assert!(pipeline.is_end_of_stream(StreamSelector::Audio));

    pipeline.close();
    // 两条流共用同一个 seek 序号，各自完成一次
    let stats = pipeline.worker_stats();
    assert_eq!(stats.len(), 2);
    for (kind, stats) in stats {
        assert_eq!(stats.seeks, 1, "{:?}", kind);
    }
    assert!(stats.iter().any(|(kind, _)| *kind == MediaKind::Audio));
    assert_eq!(backend.counters.closes(), 1);
}
