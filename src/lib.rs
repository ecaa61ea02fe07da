//! # Test Window Submit
//!
//! 辅导中心的定时测试窗口与提交引擎：学生在预约的时间窗口内
//! 恰好开启一次测试，提交一次作答，系统解析自由文本答案并判分。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/storage` - Storage 契约：条件写原语与查询
//! - `infrastructure/memory_storage` - 进程内存储实现（测试与单机部署）
//! - `infrastructure/telegram` - Bot API 客户端，Dialogue 契约的出站实现
//!
//! ### ② 业务能力层（Services）
//! - `services/answer_parser` - 自由文本答案解析（纯函数）
//! - `services/scorer` - 判分（纯函数）
//! - `services/window_access` - 窗口访问控制，封装条件写
//! - `services/session_store` - 按身份串行化的会话仓库
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/open_flow` - 开测试：open-once + 内容投递 + 补偿复位
//! - `workflow/submit_flow` - 提交：解析 → 判分 → submit-lock → 落库
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/dispatcher` - 事件路由器，每事件边界
//! - `orchestrator/app` - 装配与长轮询主循环

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{Dialogue, MemoryStorage, Storage, TelegramClient};
pub use orchestrator::{App, EventRouter};
pub use workflow::{OpenFlow, OpenOutcome, SubmitFlow, SubmitOutcome};
