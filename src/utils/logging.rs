//! 日志工具模块
//!
//! 统一初始化 tracing 订阅器，级别由 RUST_LOG 控制，默认 info。

use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化日志
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// 记录程序启动信息
pub fn log_startup(allow_partial: bool, poll_timeout_secs: u64) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 测试窗口与提交引擎");
    info!("📋 部分作答提交: {}", if allow_partial { "允许" } else { "禁止" });
    info!("⏱ 长轮询超时: {}s", poll_timeout_secs);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
