//! 应用装配与长轮询主循环 - 编排层

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::AppResult;
use crate::infrastructure::memory_storage::MemoryStorage;
use crate::infrastructure::telegram::TelegramClient;
use crate::orchestrator::dispatcher::EventRouter;

/// 应用：组装存储、对话客户端与事件路由器，驱动长轮询
pub struct App {
    config: Config,
    client: Arc<TelegramClient>,
    router: Arc<EventRouter<MemoryStorage, TelegramClient>>,
}

impl App {
    pub async fn initialize(config: Config) -> AppResult<Self> {
        let client = Arc::new(TelegramClient::new(&config));
        let username = client.get_me().await?;
        info!("🤖 Bot: @{} | 长轮询模式", username);

        let storage = Arc::new(MemoryStorage::new());
        let router = Arc::new(EventRouter::new(storage, client.clone(), &config));

        Ok(Self {
            config,
            client,
            router,
        })
    }

    pub async fn run(&self) -> AppResult<()> {
        self.client.delete_webhook(true).await?;
        info!("✓ 开始拉取更新 (timeout={}s)", self.config.poll_timeout_secs);

        let mut offset = 0i64;
        loop {
            let updates = match self.client.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("⚠️ 拉取更新失败: {}，3 秒后重试", e);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                // 跨身份并发；同一身份由会话锁串行
                let router = self.router.clone();
                tokio::spawn(async move {
                    router.handle_update(update).await;
                });
            }
        }
    }
}
