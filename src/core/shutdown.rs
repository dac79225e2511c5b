//! 优雅关闭
//!
//! ShutdownManager 持有取消令牌并监听 Ctrl+C / SIGTERM；ShutdownCoordinator 在退出前按注册顺序执行清理任务，
//! 每个任务有独立超时。工作记忆的后台清理任务共用同一个令牌。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::memory::WorkingStore;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 请求处理完毕
    Completed,
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    token: CancellationToken,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 子任务用的令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!(reason = ?reason, "shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 安装 Ctrl+C / SIGTERM 处理
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 退出前的清理任务
#[async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> Result<(), AgentError>;

    fn name(&self) -> &'static str;
}

pub struct ShutdownCoordinator {
    manager: Arc<ShutdownManager>,
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<ShutdownManager>) -> Self {
        Self {
            manager,
            cleanup_tasks: Vec::new(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub fn manager(&self) -> &Arc<ShutdownManager> {
        &self.manager
    }

    /// 触发关闭并依次执行清理；单个任务失败或超时不影响后续任务
    pub async fn run_cleanup(&self) {
        self.manager.shutdown(ShutdownReason::Completed);
        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(self.timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::debug!(task = name, "cleanup finished"),
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "cleanup failed"),
                Err(_) => tracing::warn!(task = name, timeout_secs = self.timeout.as_secs(), "cleanup timed out"),
            }
        }
    }
}

/// 等待工作记忆清理任务退出（其自身在取消时做最后一次清理）
pub struct WorkingStoreCleanup {
    store: Arc<WorkingStore>,
    sweeper: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WorkingStoreCleanup {
    pub fn new(store: Arc<WorkingStore>, sweeper: JoinHandle<()>) -> Self {
        Self {
            store,
            sweeper: tokio::sync::Mutex::new(Some(sweeper)),
        }
    }
}

#[async_trait]
impl ShutdownCleanup for WorkingStoreCleanup {
    async fn cleanup(&self) -> Result<(), AgentError> {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle
                .await
                .map_err(|e| AgentError::Memory(format!("working store sweeper panicked: {}", e)))?;
        }
        let sessions = self.store.len().await;
        tracing::info!(sessions, "working store drained");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "working_store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Flag(Arc<AtomicBool>);

    #[async_trait]
    impl ShutdownCleanup for Flag {
        async fn cleanup(&self) -> Result<(), AgentError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "flag"
        }
    }

    #[test]
    fn test_token_follows_manager() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(manager.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_coordinator_cancels_and_drains_sweeper() {
        let manager = Arc::new(ShutdownManager::new());
        let store = Arc::new(WorkingStore::new(Duration::from_secs(60), 10));
        let sweeper = Arc::clone(&store).spawn_cleanup_task(Duration::from_secs(3600), manager.token());

        let called = Arc::new(AtomicBool::new(false));
        let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager)).with_timeout(2);
        coordinator.register(WorkingStoreCleanup::new(store, sweeper));
        coordinator.register(Flag(Arc::clone(&called)));

        coordinator.run_cleanup().await;
        assert!(manager.is_shutdown());
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_working_store_cleanup_runs_on_spawned_task() {
        let manager = ShutdownManager::new();
        let store = Arc::new(WorkingStore::new(Duration::from_secs(60), 10));
        store.get_or_create("s1", None).await;
        let sweeper = Arc::clone(&store).spawn_cleanup_task(Duration::from_secs(3600), manager.token());
        let cleanup = Arc::new(WorkingStoreCleanup::new(store, sweeper));

        manager.shutdown(ShutdownReason::Completed);
        let task = Arc::clone(&cleanup);
        tokio::spawn(async move { task.cleanup().await }).await.unwrap().unwrap();
        // 第二次调用时清理任务已被取走
        cleanup.cleanup().await.unwrap();
    }
}
