use crate::core::{
    log_ctx, MediaKind, MediaSource, MessageQueue, Packet, PipelineMessage, PlayerError, Result,
    StreamInfo,
};
use crate::player::source::{Container, MediaBackend};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// 每条流的数据包队列
pub type PacketQueue = MessageQueue<Packet>;

/// 一次 `pull` 的结果
pub enum PullOutcome {
    /// 读到一个包，以及它应该进入的队列
    Packet {
        queue: Arc<PacketQueue>,
        packet: Packet,
    },
    /// 包被跳过（损坏，或者属于没有接入管线的流）
    Skipped,
    /// 数据源已读完（每条流都已收到 EndOfStream）
    Exhausted,
}

/// 解封装器 - 持有打开的容器，把交错的数据包分发到各条流的队列
///
/// 容器只关闭一次；关闭后的任何读取/seek 都返回 `PlayerError::Closed`
pub struct Demuxer {
    container: Option<Box<dyn Container>>,
    streams: Vec<StreamInfo>,
    duration: Option<f64>,
    routes: HashMap<usize, Arc<PacketQueue>>,
    eof: bool,
    source_path: String,
    packets_read: u64,
    corrupt_skipped: u64,
}

impl Demuxer {
    /// 打开媒体源
    pub fn open(backend: &dyn MediaBackend, source: &MediaSource) -> Result<Self> {
        info!("正在打开: {} (后端: {})", source.location(), backend.name());
        if source.is_network_stream() {
            info!("🌐 检测到网络流");
        }

        backend.ensure_initialized()?;
        let mut container = backend.open_container(source).map_err(|e| match e {
            PlayerError::ContainerOpen(_) => e,
            other => PlayerError::ContainerOpen(format!("{}: {}", source.location(), other)),
        })?;

        let streams = container.streams().to_vec();
        let decodable = streams
            .iter()
            .any(|s| matches!(s.kind, MediaKind::Video | MediaKind::Audio));
        if !decodable {
            container.close();
            return Err(PlayerError::NoDecodableStreams);
        }

        for stream in &streams {
            debug!(
                "流 #{}: {:?} {} ({}x{}, {:?} fps, {} Hz, {} 声道)",
                stream.index,
                stream.kind,
                stream.codec.codec_name,
                stream.codec.width,
                stream.codec.height,
                stream.codec.frame_rate,
                stream.codec.sample_rate,
                stream.codec.channels
            );
        }

        let duration = container.duration();
        Ok(Self {
            container: Some(container),
            streams,
            duration,
            routes: HashMap::new(),
            eof: false,
            source_path: source.location(),
            packets_read: 0,
            corrupt_skipped: 0,
        })
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// 指定类型的第一条流
    pub fn best_stream(&self, kind: MediaKind) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == kind)
    }

    /// 已打开的容器（用于创建解码器）
    pub fn container(&self) -> Result<&dyn Container> {
        self.container.as_deref().ok_or(PlayerError::Closed)
    }

    /// 把一条流接入管线；没有接入的流的数据包会被跳过
    pub fn attach(&mut self, stream_index: usize, queue: Arc<PacketQueue>) {
        self.routes.insert(stream_index, queue);
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn is_closed(&self) -> bool {
        self.container.is_none()
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }

    pub fn corrupt_skipped(&self) -> u64 {
        self.corrupt_skipped
    }

    /// 从容器读取下一个包，但不推入队列（由调用方决定如何等待背压）
    pub fn pull(&mut self) -> Result<PullOutcome> {
        if self.eof {
            return Ok(PullOutcome::Exhausted);
        }
        let container = self.container.as_mut().ok_or(PlayerError::Closed)?;

        match container.read_packet() {
            Ok(Some(packet)) => {
                self.packets_read += 1;
                match self.routes.get(&packet.stream_index) {
                    Some(queue) => Ok(PullOutcome::Packet {
                        queue: queue.clone(),
                        packet,
                    }),
                    None => Ok(PullOutcome::Skipped),
                }
            }
            Ok(None) => {
                info!("{} 📄 Demuxer 到达文件末尾（共 {} 个包）", log_ctx(), self.packets_read);
                self.eof = true;
                self.broadcast(|| PipelineMessage::EndOfStream);
                Ok(PullOutcome::Exhausted)
            }
            Err(PlayerError::CorruptPacket(reason)) => {
                self.corrupt_skipped += 1;
                warn!("{} ⚠ 跳过损坏的数据包: {}", log_ctx(), reason);
                Ok(PullOutcome::Skipped)
            }
            Err(e) => {
                error!("{} ❌ 读取包失败: {}", log_ctx(), e);
                self.eof = true;
                let description = e.to_string();
                self.broadcast(|| PipelineMessage::Error(description.clone()));
                self.broadcast(|| PipelineMessage::EndOfStream);
                Ok(PullOutcome::Exhausted)
            }
        }
    }

    /// 读取下一个包并推入对应流的队列（队列满时阻塞）
    ///
    /// 返回 false 表示数据源已读完
    pub fn read_next(&mut self) -> Result<bool> {
        loop {
            match self.pull()? {
                PullOutcome::Packet { queue, packet } => {
                    queue
                        .push(PipelineMessage::Data(packet))
                        .map_err(|_| PlayerError::Closed)?;
                    return Ok(true);
                }
                PullOutcome::Skipped => continue,
                PullOutcome::Exhausted => return Ok(false),
            }
        }
    }

    /// Seek：先清空所有队列，再移动读取位置，最后注入 SeekDone 哨兵
    pub fn seek(&mut self, seq: u64, time: f64) -> Result<()> {
        let container = self.container.as_mut().ok_or(PlayerError::Closed)?;

        let mut flushed = 0;
        for queue in self.routes.values() {
            flushed += queue.clear();
        }

        match container.seek_to_keyframe(time) {
            Ok(actual) => info!(
                "{} ⏩ Seek #{} 到 {:.3}s（关键帧 {:.3}s，清空 {} 条旧消息）",
                log_ctx(),
                seq,
                time,
                actual,
                flushed
            ),
            // 位置没有改变时后续读到的仍是旧位置之后的包，由解码线程按时间丢弃
            Err(e) => error!("{} ❌ Seek #{} 失败: {}", log_ctx(), seq, e),
        }

        self.eof = false;
        self.broadcast(|| PipelineMessage::SeekDone { seq, time });
        Ok(())
    }

    /// 关闭：清空队列，发送 Closed，关闭队列，释放容器（只执行一次）
    pub fn close(&mut self) {
        let Some(mut container) = self.container.take() else {
            return;
        };
        for queue in self.routes.values() {
            queue.clear();
            let _ = queue.push_control(PipelineMessage::Closed);
            queue.close();
        }
        container.close();
        info!(
            "{} 🛑 Demuxer 已关闭: {}（读取 {} 个包，跳过 {} 个损坏包）",
            log_ctx(),
            self.source_path,
            self.packets_read,
            self.corrupt_skipped
        );
    }

    /// 获取源路径描述
    pub fn description(&self) -> String {
        match &self.container {
            Some(container) => container.description(),
            None => format!("{} (已关闭)", self.source_path),
        }
    }

    fn broadcast<F>(&self, make: F)
    where
        F: Fn() -> PipelineMessage<Packet>,
    {
        for queue in self.routes.values() {
            if queue.push_control(make()).is_err() {
                debug!("{} 队列已关闭，丢弃控制消息", log_ctx());
            }
        }
    }
}

impl Drop for Demuxer {
    fn drop(&mut self) {
        self.close();
    }
}
