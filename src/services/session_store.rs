//! 会话仓库 - 业务能力层
//!
//! 身份 → 会话状态的进程内映射。
//!
//! 并发模型：外层 std 锁只保护映射本身（临界区内不 await）；
//! 每个身份各持一把 tokio 锁，同一身份的两个处理任务在状态读改写
//! 期间互斥，不同身份之间完全并行。不做过期清理（明确的非目标），
//! 条目数量只受见过的身份数约束。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as TokioMutex;

use crate::models::SessionState;

/// 会话仓库
#[derive(Default)]
pub struct SessionStore {
    inner: StdMutex<HashMap<i64, Arc<TokioMutex<SessionState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取某个身份的会话锁，首次访问时惰性创建默认状态
    /// （默认状态 = 等待电话号码，其余为空）
    pub fn get(&self, identity: i64) -> Arc<TokioMutex<SessionState>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(identity)
            .or_insert_with(|| Arc::new(TokioMutex::new(SessionState::default())))
            .clone()
    }

    /// 已知身份数量
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_default_state() {
        let store = SessionStore::new();
        assert!(store.is_empty());

        let session = store.get(42);
        let state = session.lock().await;
        assert!(state.awaiting_phone);
        assert!(!state.awaiting_appeal);
        assert!(state.active_window_id.is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_same_identity_shares_instance() {
        let store = SessionStore::new();
        {
            let first = store.get(7);
            first.lock().await.awaiting_phone = false;
        }
        let second = store.get(7);
        assert!(!second.lock().await.awaiting_phone);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_per_identity_serialization() {
        let store = Arc::new(SessionStore::new());

        // 同一身份的两个任务交替读改写，锁保证不会互相覆盖
        let mut handles = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let session = store.get(1);
                    let mut state = session.lock().await;
                    let ids = state.sent_content_message_ids.len() as i64;
                    tokio::task::yield_now().await;
                    state.sent_content_message_ids.push(ids);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let session = store.get(1);
        let state = session.lock().await;
        assert_eq!(state.sent_content_message_ids.len(), 200);
    }
}
