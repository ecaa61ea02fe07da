use anyhow::Result;

use test_window_submit::utils::logging;
use test_window_submit::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    logging::init();

    // 加载配置
    let config = Config::from_env();
    logging::log_startup(config.allow_partial_submissions, config.poll_timeout_secs);

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
