use crate::models::RecordStatus;

/// 结构性失败: 中止整个操作, 不产生部分写入.
///
/// 行级/记录级问题 (金额不符、匹配歧义、月份不足) 不走这里,
/// 一律折叠为记录状态 + 原因字符串, 保证整批导入总能跑完
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("no fee schedule for club {club_id} year {year}")]
    MissingFeeSchedule { club_id: i64, year: i32 },

    #[error("batch {0} not found")]
    BatchNotFound(i64),

    #[error("record {0} not found")]
    RecordNotFound(i64),

    #[error("member {0} not found")]
    MemberNotFound(i64),

    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: RecordStatus,
        to: RecordStatus,
    },

    #[error("member {member_id} already has a payment entry for {year}-{month:02}")]
    AlreadyPaid {
        member_id: i64,
        year: i32,
        month: u32,
    },

    #[error("amount {amount} does not equal rate {rate} x {months} months")]
    AmountMismatch { amount: i64, rate: i64, months: usize },

    #[error("only {available} unpaid months left, {needed} needed")]
    AllocationInsufficient { needed: usize, available: usize },

    #[error("invalid month selection: {0}")]
    InvalidMonths(String),

    #[error("record has no matched member")]
    NotMatched,

    #[error("csv export failed: {0}")]
    Export(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl ReconcileError {
    /// PostgreSQL 唯一索引冲突 (23505) 视为正常的"已缴费"校验失败,
    /// 其余存储错误原样上抛
    pub fn from_insert_error(e: sqlx::Error, member_id: i64, year: i32, month: u32) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.code().as_deref() == Some("23505") {
                return ReconcileError::AlreadyPaid {
                    member_id,
                    year,
                    month,
                };
            }
        }
        ReconcileError::Storage(e)
    }
}
