//! Coach - AI 训练教练编排引擎
//!
//! 入口：加载配置、初始化日志、构建编排器，执行一次请求（JSON 文件）并输出结果。
//! `coach schema` 输出请求格式的 JSON Schema。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use coach::config::load_config;
use coach::core::{CoachBuilder, ShutdownCoordinator, ShutdownManager, WorkingStoreCleanup};
use coach::memory::WorkingStore;
use coach::store::{Fixtures, InMemoryRepository};
use coach::tools::request_schema_json;
use coach::{observability, Request};
use futures_util::StreamExt;

/// AI 训练教练编排引擎
#[derive(Parser, Debug)]
#[command(name = "coach")]
#[command(about = "Plan generation, chat-based plan edits and workout analysis")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 执行一次请求
    Run {
        /// 请求 JSON 文件（camelCase 字段）
        request: PathBuf,
        /// 流式输出文本片段
        #[arg(long)]
        stream: bool,
        /// 额外配置文件
        #[arg(long)]
        config: Option<PathBuf>,
        /// 计划/记录 fixture（JSON），代替 SQLite 仓库
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },
    /// 输出请求格式的 JSON Schema
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Schema => {
            println!("{}", request_schema_json());
            Ok(())
        }
        Commands::Run {
            request,
            stream,
            config,
            fixtures,
        } => run(request, stream, config, fixtures).await,
    }
}

async fn run(
    request_path: PathBuf,
    stream: bool,
    config_path: Option<PathBuf>,
    fixtures: Option<PathBuf>,
) -> anyhow::Result<()> {
    let cfg = load_config(config_path).context("Failed to load config")?;
    observability::init(&cfg.log);

    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("Failed to read request {}", request_path.display()))?;
    let request: Request = serde_json::from_str(&raw).context("Invalid request JSON")?;

    // 工作记忆后台清理与关闭协调
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let working = Arc::new(WorkingStore::from_config(&cfg.memory));
    let sweeper = Arc::clone(&working).spawn_cleanup_task(
        Duration::from_secs(cfg.memory.cleanup_interval_secs.max(1)),
        shutdown.token(),
    );
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(WorkingStoreCleanup::new(Arc::clone(&working), sweeper));

    let mut builder = CoachBuilder::new(cfg).with_working_store(working);
    if let Some(path) = fixtures {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fixtures {}", path.display()))?;
        let fixtures: Fixtures = serde_json::from_str(&text).context("Invalid fixtures JSON")?;
        builder = builder.with_repository(Arc::new(InMemoryRepository::from_fixtures(fixtures)));
    }
    let agent = builder.build().context("Failed to build coach agent")?;

    let work = async {
        if stream {
            let mut chunks = agent.execute_streaming(request).await;
            let mut stdout = std::io::stdout();
            while let Some(chunk) = chunks.next().await {
                print!("{}", chunk);
                stdout.flush()?;
            }
            println!();
        } else {
            let response = agent.execute(request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        anyhow::Ok(())
    };

    let result = tokio::select! {
        r = work => r,
        _ = shutdown.wait_for_shutdown() => {
            tracing::warn!("interrupted before the request finished");
            Ok(())
        }
    };

    coordinator.run_cleanup().await;
    result
}
