use crate::core::{PlayerError, Result};
use log::{error, info};
use once_cell::sync::OnceCell;

/// 进程级一次性初始化守卫（解码库全局注册表）
///
/// 第一次打开容器时惰性执行，之后不再重跑，也不会在进程中途拆除。
/// 初始化失败的结果同样被缓存，后续调用直接返回同样的错误。
pub struct InitGuard {
    name: &'static str,
    cell: OnceCell<std::result::Result<(), String>>,
}

impl InitGuard {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            cell: OnceCell::new(),
        }
    }

    pub fn ensure_initialized<F>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let outcome = self.cell.get_or_init(|| match init() {
            Ok(()) => {
                info!("✅ {} 初始化成功", self.name);
                Ok(())
            }
            Err(e) => {
                error!("❌ {} 初始化失败: {}", self.name, e);
                Err(e.to_string())
            }
        });
        outcome
            .clone()
            .map_err(|e| PlayerError::Other(format!("{} 初始化失败: {}", self.name, e)))
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_init_runs_once() {
        static GUARD: InitGuard = InitGuard::new("test-registry");
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        assert!(!GUARD.is_initialized());
        for _ in 0..3 {
            GUARD
                .ensure_initialized(|| {
                    CALLS.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(GUARD.is_initialized());
    }

    #[test]
    fn test_failed_init_is_sticky() {
        static GUARD: InitGuard = InitGuard::new("broken-registry");
        assert!(GUARD
            .ensure_initialized(|| Err(PlayerError::Other("no codecs".into())))
            .is_err());
        // 不会重试
        assert!(GUARD.ensure_initialized(|| Ok(())).is_err());
        assert!(!GUARD.is_initialized());
    }
}
