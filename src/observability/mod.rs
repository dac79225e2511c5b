//! 可观测性：日志初始化
//!
//! RUST_LOG 优先，否则使用 [log].level；[log].format = "json" 时输出 JSON 行（审计日志可直接采集）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSection;

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局 subscriber；已安装时静默返回 false（测试中可重复调用）
pub fn init(cfg: &LoggingSection) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter(&cfg.level));
    let result = if cfg.format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let cfg = LoggingSection {
            level: "debug".into(),
            format: "json".into(),
        };
        let _ = init(&cfg);
        assert!(!init(&LoggingSection::default()));
    }
}
