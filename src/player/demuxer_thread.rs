use crate::core::{log_ctx, Packet, PipelineMessage, PlayerError, PushError, Result};
use crate::player::demuxer::{Demuxer, PacketQueue, PullOutcome};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Demuxer 线程命令
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxerCommand {
    Seek { seq: u64, time: f64 },
    Close,
}

/// Demuxer 线程管理器
///
/// - 数据包经有界 MessageQueue 发往解码线程，队列满时自然背压
/// - 背压等待期间仍按 `poll_interval` 检查命令，seek/close 不会被卡住
/// - 到达 EOF 后线程阻塞在命令通道上，等待 Seek/Close
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<()>>,
    command_tx: Sender<DemuxerCommand>,
}

impl DemuxerThread {
    /// 启动 Demuxer 线程（Demuxer 的所有权移入线程）
    pub fn start(demuxer: Demuxer, poll_interval: Duration) -> Result<Self> {
        let (command_tx, command_rx) = unbounded::<DemuxerCommand>();

        let thread_handle = thread::Builder::new()
            .name("demuxer".into())
            .spawn(move || Self::demux_loop(demuxer, command_rx, poll_interval))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            command_tx,
        })
    }

    /// Demuxer 循环（在独立线程中运行）
    fn demux_loop(mut demuxer: Demuxer, command_rx: Receiver<DemuxerCommand>, poll_interval: Duration) {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), demuxer.description());

        // 因背压还没送出去的包
        let mut held: Option<(Arc<PacketQueue>, Packet)> = None;
        let mut routed: u64 = 0;

        loop {
            let mut commands = Vec::new();
            if demuxer.is_eof() && held.is_none() {
                // 不忙等：EOF 后只等命令
                match command_rx.recv() {
                    Ok(cmd) => commands.push(cmd),
                    Err(_) => {
                        info!("{} 命令通道已断开，Demuxer 线程退出", log_ctx());
                        break;
                    }
                }
            }
            commands.extend(command_rx.try_iter());

            let mut close = false;
            let mut seek: Option<(u64, f64)> = None;
            for cmd in commands {
                match cmd {
                    DemuxerCommand::Seek { seq, time } => {
                        if let Some((old_seq, _)) = seek {
                            debug!("{} Seek #{} 被 #{} 取代", log_ctx(), old_seq, seq);
                        }
                        seek = Some((seq, time));
                    }
                    DemuxerCommand::Close => close = true,
                }
            }

            if close {
                info!("{} ⏹ Demuxer 线程收到关闭命令", log_ctx());
                break;
            }

            if let Some((seq, time)) = seek {
                if held.take().is_some() {
                    debug!("{} 丢弃 seek 前读取的数据包", log_ctx());
                }
                if let Err(e) = demuxer.seek(seq, time) {
                    error!("{} ❌ Seek 失败: {}", log_ctx(), e);
                    break;
                }
            }

            if held.is_none() {
                match demuxer.pull() {
                    Ok(PullOutcome::Packet { queue, packet }) => held = Some((queue, packet)),
                    Ok(PullOutcome::Skipped) | Ok(PullOutcome::Exhausted) => continue,
                    Err(e) => {
                        error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                        break;
                    }
                }
            }

            if let Some((queue, packet)) = held.take() {
                match queue.push_timeout(PipelineMessage::Data(packet), poll_interval) {
                    Ok(()) => {
                        routed += 1;
                        if routed <= 5 || routed % 500 == 0 {
                            debug!("{} 📦 Demuxer 已分发 {} 个包", log_ctx(), routed);
                        }
                    }
                    Err(PushError::Timeout(msg)) | Err(PushError::Full(msg)) => {
                        // 队列满：下一轮先检查命令再重试
                        if let PipelineMessage::Data(packet) = msg {
                            held = Some((queue, packet));
                        }
                    }
                    Err(PushError::Closed(_)) => {
                        warn!("{} ⚠ 数据包队列已关闭，Demuxer 线程退出", log_ctx());
                        break;
                    }
                }
            }
        }

        demuxer.close();
        info!("{} 🛑 Demuxer 线程退出（共分发 {} 个包）", log_ctx(), routed);
    }

    /// 发送 Seek 命令
    pub fn seek(&self, seq: u64, time: f64) -> Result<()> {
        self.command_tx
            .send(DemuxerCommand::Seek { seq, time })
            .map_err(|e| PlayerError::Other(format!("发送 Seek 命令失败: {}", e)))
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// 停止线程：发送 Close 命令并 join
    pub fn stop(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        info!("{} 🛑 DemuxerThread::stop() called", log_ctx());
        let _ = self.command_tx.send(DemuxerCommand::Close);
        if handle.join().is_err() {
            error!("{} ❌ Demuxer 线程 panic", log_ctx());
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但未调用 stop()，正在尝试优雅停止", log_ctx());
            self.stop();
        }
    }
}
