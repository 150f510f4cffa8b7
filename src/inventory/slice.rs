//! 主机名模板展开
//!
//! 模板中的 `[A:B]` 片段按数字或单字母区间展开（右开区间），
//! 多个片段取笛卡尔积

use once_cell::sync::Lazy;
use regex::Regex;

use super::InventoryError;

/// 在主机名中查找片段
static SLICE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\w*:\w*\]").expect("valid regex"));

/// 单个片段的完整匹配
static SLICE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\w*):(\w*)\]$").expect("valid regex"));

/// 片段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    /// 数字区间，如 `[1:10]`
    Numeric,
    /// 单字母区间，如 `[a:e]`
    Letter,
}

/// 解析后的片段及其替换值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceTemplate {
    /// 原始片段文本（含方括号）
    pub token: String,
    pub kind: SliceKind,
    /// 按顺序排列的替换值
    pub values: Vec<String>,
}

impl SliceTemplate {
    /// 解析片段文本，既不是数字区间也不是单字母区间时返回错误
    pub fn parse(token: &str) -> Result<Self, InventoryError> {
        let slice_error = || InventoryError::Slice(token.to_string());

        let caps = SLICE_TOKEN.captures(token).ok_or_else(slice_error)?;
        let (start, end) = (&caps[1], &caps[2]);

        if is_number(start) && is_number(end) {
            let start: u64 = start.parse().map_err(|_| slice_error())?;
            let end: u64 = end.parse().map_err(|_| slice_error())?;
            return Ok(Self {
                token: token.to_string(),
                kind: SliceKind::Numeric,
                values: (start..end).map(|n| n.to_string()).collect(),
            });
        }

        match (single_letter(start), single_letter(end)) {
            (Some(start), Some(end)) => Ok(Self {
                token: token.to_string(),
                kind: SliceKind::Letter,
                values: (start as u32..end as u32)
                    .filter_map(char::from_u32)
                    .map(String::from)
                    .collect(),
            }),
            _ => Err(slice_error()),
        }
    }
}

fn is_number(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn single_letter(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_alphabetic() => Some(c),
        _ => None,
    }
}

/// 按出现顺序返回主机名中的所有片段
pub fn find_slices(key: &str) -> Vec<&str> {
    SLICE_PATTERN.find_iter(key).map(|m| m.as_str()).collect()
}

/// 展开主机名模板
///
/// 每个组合按片段出现顺序依次替换，每次只替换第一个尚未替换的相同片段，
/// 因此重复出现的片段按位置分别取值。没有片段时返回模板本身
pub fn expand_key(key: &str) -> Result<Vec<String>, InventoryError> {
    let slices = find_slices(key)
        .into_iter()
        .map(SliceTemplate::parse)
        .collect::<Result<Vec<_>, _>>()?;

    let names = cartesian(&slices)
        .into_iter()
        .map(|combo| {
            slices
                .iter()
                .zip(combo)
                .fold(key.to_string(), |name, (slice, value)| {
                    name.replacen(&slice.token, value, 1)
                })
        })
        .collect();

    Ok(names)
}

fn cartesian(slices: &[SliceTemplate]) -> Vec<Vec<&str>> {
    let mut combos: Vec<Vec<&str>> = vec![Vec::new()];
    for slice in slices {
        combos = combos
            .into_iter()
            .flat_map(|prefix| {
                slice.values.iter().map(move |value| {
                    let mut combo = prefix.clone();
                    combo.push(value.as_str());
                    combo
                })
            })
            .collect();
    }
    combos
}
