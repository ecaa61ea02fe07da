//! 电话号码归一化 - 业务能力层
//!
//! 乌兹别克斯坦号码统一成 +998XXXXXXXXX 形式；
//! 数据库里可能存了带 + 和不带 + 两种写法，查询时用变体集合。

/// 归一化为 E.164 风格（尽力而为，空输入返回空串）
pub fn normalize_uz_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    if digits.len() == 9 {
        return format!("+998{digits}");
    }
    format!("+{digits}")
}

/// 查询用变体集合：带 + 的归一化形式和不带 + 的裸数字形式
pub fn phone_variants(raw: &str) -> Vec<String> {
    let normalized = normalize_uz_phone(raw);
    if normalized.is_empty() {
        return Vec::new();
    }
    let bare = normalized.trim_start_matches('+').to_string();
    vec![normalized, bare]
}
