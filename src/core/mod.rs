// 核心数据结构和类型定义

pub mod types;
pub mod clock;
pub mod config;
pub mod error;
pub mod init;
pub mod pool;
pub mod queue;

pub use types::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use init::InitGuard;
pub use pool::{BufferPool, BufferRecycler};
pub use queue::{MessageQueue, PushError};

use std::process;
use std::thread;

/// 日志上下文（进程 ID + 线程 ID），跨线程排查时使用
pub fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
