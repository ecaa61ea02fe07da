//! 展示格式化 - 业务能力层

use chrono::{DateTime, Datelike, NaiveDate, Utc};

/// 日期时间，如 "21.08.2026 14:05"
pub fn format_date(dt: &DateTime<Utc>) -> String {
    dt.format("%d.%m.%Y %H:%M").to_string()
}

/// 月份标签，如 "08.2026"
pub fn format_month(dt: &DateTime<Utc>) -> String {
    dt.format("%m.%Y").to_string()
}

/// 当前自然月的 [月初, 下月初) 区间
pub fn month_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let (year, month) = (now.year(), now.month());
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    // 每月 1 日 00:00 总是合法时刻，兜底用 now 只为消掉 Option
    let start = first_instant(year, month).unwrap_or(now);
    let end = first_instant(next_year, next_month).unwrap_or(now);
    (start, end)
}

fn first_instant(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    let naive = date.and_hms_opt(0, 0, 0)?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}
