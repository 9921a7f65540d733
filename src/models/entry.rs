use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 缴费条目: 某会员某年某月的一笔月费
///
/// (member_id, year, month) 唯一 — 整个子系统的幂等性核心.
/// 仅在确认事务内创建, 创建后不更新; 退款/冲销不在本服务范围
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub id: i64,
    pub member_id: i64,
    pub payment_record_id: i64,
    pub year: i32,
    pub month: i32,
    pub amount: i64,
    pub confirmed_by_admin_id: i64,
    pub confirmed_at: DateTime<Utc>,
}
