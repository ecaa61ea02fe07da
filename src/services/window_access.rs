//! 访问窗口控制 - 业务能力层
//!
//! 把"只开一次"和"时间界内"两条不变量落实到存储协作方的条件原子更新上。
//!
//! 关键约定：try_open_once / lock_for_submission 必须是由存储层一次性
//! 评估的单条条件写，绝不能在调用方做先读后写 —— 跨进程的并发竞争
//! （开 vs 开、交 vs 交、开 vs 交）全部只靠这两条条件写裁决，
//! 应用层不持有任何窗口级别的锁。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::infrastructure::storage::Storage;
use crate::models::{AccessWindow, WindowForSubmit};

/// 访问窗口控制器
pub struct WindowAccessController<S> {
    storage: Arc<S>,
}

impl<S: Storage> WindowAccessController<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// 查学生当前的活跃窗口（连同测试定义和内容页）
    ///
    /// 多个符合时取 open_from 最晚的那个；没有不算错误，返回 None
    pub async fn get_active_window(
        &self,
        student_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccessWindow>, StorageError> {
        self.storage.get_active_window(student_user_id, now).await
    }

    /// 原子地标记窗口已开启
    ///
    /// 仅当 opened_at 为空、is_active、且 now 在 [open_from, open_to] 内
    /// 时生效；并发竞争者恰好一个得到 true
    pub async fn try_open_once(
        &self,
        window_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let opened = self.storage.try_open_once(window_id, now).await?;
        debug!("窗口 {} try_open_once => {}", window_id, opened);
        Ok(opened)
    }

    /// 补偿复位：无条件清空 opened_at
    ///
    /// 只在开启成功后内容投递失败时调用。复位与失败投递之间存在
    /// 理论上的竞争空隙，属于已记录的低风险取舍，不引入分布式锁
    pub async fn reset_opened(&self, window_id: &str) -> Result<(), StorageError> {
        warn!("窗口 {} 投递失败，补偿复位 opened_at", window_id);
        self.storage.reset_opened(window_id).await
    }

    /// 提交校验视图：窗口仍须活跃、未提交、在时间界内，
    /// 且与 (窗口, 学生, 测试) 三元组精确匹配
    pub async fn window_for_submit(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WindowForSubmit>, StorageError> {
        self.storage
            .get_window_for_submit(window_id, student_user_id, test_id, now)
            .await
    }

    /// 原子的 submit-lock：置 submitted_at = now、is_active = false、
    /// open_to = now，仅当窗口仍活跃且未提交时生效
    pub async fn lock_for_submission(
        &self,
        window_id: &str,
        student_user_id: &str,
        test_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let locked = self
            .storage
            .lock_for_submission(window_id, student_user_id, test_id, now)
            .await?;
        debug!("窗口 {} lock_for_submission => {}", window_id, locked);
        Ok(locked)
    }
}
