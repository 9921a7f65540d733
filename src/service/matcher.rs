use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::models::DirectorySnapshot;

/// 匹配方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Partial,
    None,
}

/// 存款人匹配结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub member_id: Option<i64>,
    pub match_type: MatchType,
}

impl MatchOutcome {
    pub fn none() -> Self {
        Self {
            member_id: None,
            match_type: MatchType::None,
        }
    }
}

/// 细分的解析结果: 歧义与未命中在记录原因里要分开呈现
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResolution {
    Matched { member_id: i64, match_type: MatchType },
    /// 多个候选, 绝不猜测
    Ambiguous { candidates: usize },
    NotFound,
}

impl MatchResolution {
    pub fn outcome(self) -> MatchOutcome {
        match self {
            MatchResolution::Matched {
                member_id,
                match_type,
            } => MatchOutcome {
                member_id: Some(member_id),
                match_type,
            },
            _ => MatchOutcome::none(),
        }
    }
}

/// 联名户名常见分隔符 ("김철수·박영희" 样式)
const JOINT_SEPARATORS: [char; 5] = ['·', ',', '，', '/', '&'];

/// 比较前的归一化: 去首尾空白, 连续空白折叠为单个空格, 大小写折叠
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 存款人姓名 -> 会员解析 (纯函数, 不做 I/O)
///
/// 优先级: 精确相等 > 联名夫妻户 > 单一包含关系.
/// 多个候选歧义时返回 None — 错认会员比进人工复核队列更糟
pub fn match_depositor(depositor_name: &str, snapshot: &DirectorySnapshot) -> MatchOutcome {
    resolve_depositor(depositor_name, snapshot).outcome()
}

/// match_depositor 的细分版本, 导入时用来区分歧义与未命中
pub fn resolve_depositor(depositor_name: &str, snapshot: &DirectorySnapshot) -> MatchResolution {
    let normalized = normalize_name(depositor_name);
    if normalized.is_empty() {
        return MatchResolution::NotFound;
    }

    // 1. 精确匹配, 无歧义, 立即返回
    for member in &snapshot.members {
        if normalize_name(&member.display_name) == normalized {
            return MatchResolution::Matched {
                member_id: member.id,
                match_type: MatchType::Exact,
            };
        }
    }

    // 2. 联名户名: 两半分别解析, 同属一个夫妻组时返回组内主会员
    if let Some(member_id) = match_joint_couple(depositor_name, snapshot) {
        return MatchResolution::Matched {
            member_id,
            match_type: MatchType::Exact,
        };
    }

    // 3. 包含关系 (处理 "김철수(아들)" 之类附注): 恰好一个候选才算数
    let mut candidates: IndexSet<i64> = IndexSet::new();
    for member in &snapshot.members {
        let member_name = normalize_name(&member.display_name);
        if member_name.is_empty() {
            continue;
        }
        if normalized.contains(&member_name) || member_name.contains(&normalized) {
            candidates.insert(member.id);
        }
    }

    if candidates.len() > 1 {
        MatchResolution::Ambiguous {
            candidates: candidates.len(),
        }
    } else if let Some(&member_id) = candidates.first() {
        MatchResolution::Matched {
            member_id,
            match_type: MatchType::Partial,
        }
    } else {
        MatchResolution::NotFound
    }
}

/// 联名户名解析: 两半都精确命中且配成同一夫妻组才成立
fn match_joint_couple(depositor_name: &str, snapshot: &DirectorySnapshot) -> Option<i64> {
    let (left, right) = split_joint_name(depositor_name)?;
    let left_id = exact_member_id(&left, snapshot)?;
    let right_id = exact_member_id(&right, snapshot)?;
    if left_id == right_id {
        return None;
    }

    let group = snapshot.couple_group_of(left_id)?;
    let pair = [group.member_a, group.member_b];
    if pair.contains(&left_id) && pair.contains(&right_id) {
        Some(group.primary_member)
    } else {
        None
    }
}

fn split_joint_name(raw: &str) -> Option<(String, String)> {
    for sep in JOINT_SEPARATORS {
        if let Some((left, right)) = raw.split_once(sep) {
            let (left, right) = (left.trim(), right.trim());
            if !left.is_empty() && !right.is_empty() {
                return Some((left.to_string(), right.to_string()));
            }
        }
    }
    // 无分隔符时再试恰好两个空白分隔的词
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    if let [left, right] = tokens[..] {
        return Some((left.to_string(), right.to_string()));
    }
    None
}

fn exact_member_id(name: &str, snapshot: &DirectorySnapshot) -> Option<i64> {
    let normalized = normalize_name(name);
    snapshot
        .members
        .iter()
        .find(|m| normalize_name(&m.display_name) == normalized)
        .map(|m| m.id)
}
