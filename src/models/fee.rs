use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::member::MemberType;

/// 会费标准 (每俱乐部每年度, 最小货币单位整数)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub club_id: i64,
    pub year: i32,
    pub regular_amount: i64,
    pub couple_amount: i64,
}

impl FeeSchedule {
    /// 按会员类别取适用月费
    pub fn rate_for(&self, member_type: MemberType) -> i64 {
        match member_type {
            MemberType::Regular => self.regular_amount,
            MemberType::Couple => self.couple_amount,
        }
    }
}
