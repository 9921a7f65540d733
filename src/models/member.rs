use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;

/// 会员 (外部会员目录维护, 本服务只读)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub display_name: String,
}

/// 夫妻组: 两名会员共用一份会费
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CoupleGroup {
    pub id: i64,
    pub member_a: i64,
    pub member_b: i64,
    /// 联名匹配时确定性返回的一方
    pub primary_member: i64,
}

/// 会员类别, 决定适用的月费标准
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    Regular,
    Couple,
}

/// 会员目录快照: 每批次构建一次, 批内所有行复用
///
/// couple 关系折叠为 member_id -> group 下标的查找表, 避免逐行联表
#[derive(Debug, Clone)]
pub struct DirectorySnapshot {
    pub members: Vec<Member>,
    pub couple_groups: Vec<CoupleGroup>,
    couple_index: HashMap<i64, usize>,
}

impl DirectorySnapshot {
    pub fn new(members: Vec<Member>, couple_groups: Vec<CoupleGroup>) -> Self {
        let mut couple_index = HashMap::with_capacity(couple_groups.len() * 2);
        for (idx, group) in couple_groups.iter().enumerate() {
            couple_index.insert(group.member_a, idx);
            couple_index.insert(group.member_b, idx);
        }
        Self {
            members,
            couple_groups,
            couple_index,
        }
    }

    pub fn member_type(&self, member_id: i64) -> MemberType {
        if self.couple_index.contains_key(&member_id) {
            MemberType::Couple
        } else {
            MemberType::Regular
        }
    }

    pub fn couple_group_of(&self, member_id: i64) -> Option<&CoupleGroup> {
        self.couple_index
            .get(&member_id)
            .map(|&idx| &self.couple_groups[idx])
    }
}
