use anyhow::{bail, Context, Result};
use log::{info, warn};
use myy_pipeline::core::{FrameData, PlaybackClock};
use myy_pipeline::player::FfmpegBackend;
use myy_pipeline::{
    FrameResult, MediaSource, OpenOptions, PipelineConfig, PipelineCoordinator, StreamSelector,
};
use std::thread;
use std::time::Duration;

/// 命令行参数
struct Args {
    source: String,
    seek: Option<f64>,
    config: Option<String>,
    want_audio: bool,
    want_hardware_accel: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        source: String::new(),
        seek: None,
        config: None,
        want_audio: true,
        want_hardware_accel: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--seek" => {
                let value = iter.next().context("--seek 需要一个时间（秒）")?;
                args.seek = Some(value.parse().context("--seek 不是有效的数字")?);
            }
            "--config" => args.config = Some(iter.next().context("--config 需要一个路径")?),
            "--no-audio" => args.want_audio = false,
            "--hw" => args.want_hardware_accel = true,
            other if other.starts_with("--") => bail!("未知参数: {}", other),
            other => args.source = other.to_string(),
        }
    }
    if args.source.is_empty() {
        bail!("用法: myy-pipeline <文件或URL> [--seek 秒] [--config 配置.json] [--no-audio] [--hw]");
    }
    Ok(args)
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 MYY Pipeline 启动");

    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("无法读取配置 {}", path))?,
        None => PipelineConfig::default(),
    };
    let options = OpenOptions {
        want_hardware_accel: args.want_hardware_accel,
        want_audio: args.want_audio,
    };

    let source = MediaSource::from_url(&args.source);
    let mut pipeline = PipelineCoordinator::open(&FfmpegBackend::new(), &source, options, config)
        .with_context(|| format!("无法打开 {}", args.source))?;
    info!(
        "媒体信息: {}",
        serde_json::to_string(pipeline.media_info()).unwrap_or_default()
    );

    pipeline.start_decoding()?;

    let clock = PlaybackClock::new();
    if let Some(time) = args.seek {
        pipeline.seek(time)?;
        clock.set_time(time);
    }
    clock.play();

    let frame_period = pipeline.frame_period();
    // 模拟音频设备回调：按播放时钟拉取，单次最多 200ms
    let audio_format = pipeline.media_info().audio.as_ref().map(|a| a.output);
    let mut audio_buffer = audio_format
        .map(|f| vec![0.0f32; (f.sample_rate as usize / 5) * f.channels as usize])
        .unwrap_or_default();

    let mut presented = 0u64;
    let mut reused = 0u64;
    loop {
        match pipeline.get_frame_for_time(clock.now())? {
            FrameResult::NewFrame(frame) => {
                presented += 1;
                if presented % 100 == 1 {
                    let kind = match &frame.data {
                        FrameData::Cpu(cpu) => format!("{}x{} {:?}", cpu.width, cpu.height, cpu.format),
                        FrameData::Hardware(handle) => format!("surface {:?}", handle),
                    };
                    info!("🖼 帧 #{} @ {:.3}s ({})", presented, frame.time, kind);
                }
                pipeline.recycle_frame(frame);
            }
            FrameResult::ReuseLastFrame => reused += 1,
        }

        let due = pipeline
            .audio_samples_due(clock.now())
            .min(audio_buffer.len());
        if due > 0 {
            let filled = pipeline.fill_audio_buffer(&mut audio_buffer[..due]);
            if filled < due && !pipeline.is_end_of_stream(StreamSelector::Audio) {
                warn!("音频欠载: {}/{}", filled, due);
            }
        }

        if pipeline.is_end_of_stream(StreamSelector::All) {
            info!("✅ 播放结束");
            break;
        }
        thread::sleep(Duration::from_secs_f64(frame_period / 2.0));
    }

    info!("共呈现 {} 帧，复用上一帧 {} 次", presented, reused);
    pipeline.close();
    for (kind, stats) in pipeline.worker_stats() {
        info!(
            "{:?} 解码统计: {}",
            kind,
            serde_json::to_string(stats).unwrap_or_default()
        );
    }
    Ok(())
}
