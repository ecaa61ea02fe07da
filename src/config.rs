/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// Telegram Bot Token
    pub bot_token: String,
    /// Web 端基础 URL（用于拼接测试内容页的相对路径）
    pub web_base_url: String,
    /// 是否允许部分作答提交
    pub allow_partial_submissions: bool,
    /// 是否打印每条入站更新（调试用）
    pub debug_updates: bool,
    /// getUpdates 长轮询超时（秒）
    pub poll_timeout_secs: u64,
    /// 管理员联系方式（缴费/申诉引导文案里使用）
    pub admin_contact: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            web_base_url: "http://localhost:3000".to_string(),
            allow_partial_submissions: false,
            debug_updates: true,
            poll_timeout_secs: 30,
            admin_contact: "@ceo97".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            bot_token: std::env::var("BOT_TOKEN").unwrap_or(default.bot_token),
            web_base_url: std::env::var("WEB_BASE_URL").unwrap_or(default.web_base_url),
            allow_partial_submissions: std::env::var("ALLOW_PARTIAL_SUBMISSIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.allow_partial_submissions),
            debug_updates: std::env::var("DEBUG_UPDATES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.debug_updates),
            poll_timeout_secs: std::env::var("POLL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.poll_timeout_secs),
            admin_contact: std::env::var("ADMIN_CONTACT").unwrap_or(default.admin_contact),
        }
    }
}
