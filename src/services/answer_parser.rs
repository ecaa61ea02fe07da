//! 答案文本解析 - 业务能力层
//!
//! 纯函数：原始文本 → 按题号排好的作答序列。
//!
//! 宽松文法：大写化、去空白后，从左到右提取形如 `(1~3位数字)(A~D)` 的
//! 最大匹配片段；不匹配的字符静默跳过，噪音不构成硬失败。
//! 题号越界的片段丢弃；同一题号以首次出现为准，后续重复忽略。
//! 扫描后若一个有效片段都没有，判为 MalformedInput。

use thiserror::Error;

/// 解析失败（格式完全无法辨认）— 总是可恢复，调用方提示重发
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("答案文本无法解析")]
pub struct MalformedInput;

/// 解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswers {
    /// 每题一格，长度 == total_questions，未作答为 None
    pub per_question: Vec<Option<char>>,
    /// 按扫描顺序记录的 (题号, 字母) 有效片段
    pub matches: Vec<(usize, char)>,
}

/// 归一化后允许的最小/最大长度
const MIN_LEN: usize = 2;
const MAX_LEN: usize = 3000;

/// 解析自由文本作答
///
/// 空格容忍、大小写不敏感，如 "1a 2b3c"。
/// 缺答的格位保持 None — 完整性政策由调用方执行，解析层不管。
pub fn parse_answer_text(
    raw_text: &str,
    total_questions: usize,
) -> Result<ParsedAnswers, MalformedInput> {
    let chars: Vec<char> = raw_text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if chars.len() < MIN_LEN || chars.len() > MAX_LEN {
        return Err(MalformedInput);
    }

    let mut per_question: Vec<Option<char>> = vec![None; total_questions];
    let mut matches: Vec<(usize, char)> = Vec::new();

    // 显式字符扫描，等价于正则 (\d{1,3})([A-D]) 的逐个最大匹配：
    // 每个起点先试 3 位数字再回退到 2 位、1 位，命中后跳到片段末尾继续。
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let mut consumed = 0;
        for take in (1..=3).rev() {
            let Some(&letter) = chars.get(i + take) else {
                continue;
            };
            if !chars[i..i + take].iter().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if !matches!(letter, 'A'..='D') {
                continue;
            }

            // 1~3 位十进制数，不会溢出
            let number: usize = chars[i..i + take]
                .iter()
                .collect::<String>()
                .parse()
                .unwrap_or(0);

            if (1..=total_questions).contains(&number) && per_question[number - 1].is_none() {
                per_question[number - 1] = Some(letter);
                matches.push((number, letter));
            }
            // 越界或重复题号：片段本身仍被消耗，只是不记录

            consumed = take + 1;
            break;
        }

        i += if consumed > 0 { consumed } else { 1 };
    }

    if matches.is_empty() {
        return Err(MalformedInput);
    }

    Ok(ParsedAnswers {
        per_question,
        matches,
    })
}
