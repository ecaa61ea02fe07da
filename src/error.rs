//! 错误类型定义
//!
//! 预期之内的业务结局（如"没有进行中的测试"、"按钮已被使用"）不走错误通道，
//! 由各流程的 Outcome 枚举表达；这里只定义真正意外的失败。

use thiserror::Error;

/// 存储协作方错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 后端不可用或底层操作失败
    #[error("存储后端错误: {message}")]
    Backend { message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            message: message.into(),
        }
    }
}

/// 消息投递错误（对话协作方出站半边）
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 网络请求失败
    #[error("Bot API 请求失败: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    /// Bot API 返回 ok=false
    #[error("Bot API 返回错误响应: {description}")]
    BadResponse { description: String },
}

/// 应用程序错误
#[derive(Debug, Error)]
pub enum AppError {
    /// 存储调用失败
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),
    /// 消息投递失败
    #[error("投递错误: {0}")]
    Delivery(#[from] DeliveryError),
    /// submit-lock 已生效但提交内容落库失败。
    /// 窗口保持已提交状态（接受的取舍：不允许二次提交优先于至少一次落库），
    /// 需要人工对账，调用方必须记录日志。
    #[error("提交落库失败（窗口已锁定）: {0}")]
    Persistence(StorageError),
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
