use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 规范化后的银行流水行 (上游行解析器产出, 本服务不做表格解析)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRow {
    pub transaction_date: NaiveDate,
    pub depositor_name: String,
    /// 最小货币单位整数
    pub amount: i64,
    #[serde(default)]
    pub memo: String,
}

/// 上传批次: 一次表格导入事件, 创建后不可变
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UploadBatch {
    pub id: i64,
    pub club_id: i64,
    pub year: i32,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
    pub record_count: i32,
}

/// 对账记录状态机
///
/// PENDING -> {MATCHED | ERROR} -> {CONFIRMED | SKIPPED}
/// MATCHED <-> ERROR 可经人工改派互转; CONFIRMED / SKIPPED 为终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum RecordStatus {
    Pending,
    Matched,
    Error,
    Confirmed,
    Skipped,
}

impl RecordStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RecordStatus::Confirmed | RecordStatus::Skipped)
    }

    /// 状态机唯一的转移校验入口, 所有状态变更都经过这里
    pub fn can_transition_to(self, next: RecordStatus) -> bool {
        use RecordStatus::*;
        match (self, next) {
            // 终态不再离开
            (Confirmed | Skipped, _) => false,
            // 匹配/校验与人工改派
            (Pending | Matched | Error, Matched | Error | Pending) => true,
            // 操作员确认或跳过
            (Pending | Matched | Error, Confirmed | Skipped) => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Matched => "MATCHED",
            RecordStatus::Error => "ERROR",
            RecordStatus::Confirmed => "CONFIRMED",
            RecordStatus::Skipped => "SKIPPED",
        }
    }
}

/// 待插入的对账记录 (导入分类阶段产出)
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub transaction_date: NaiveDate,
    pub depositor_name: String,
    pub amount: i64,
    pub memo: String,
    pub matched_member_id: Option<i64>,
    pub status: RecordStatus,
    pub error_reason: Option<String>,
}

/// 对账记录: 对账的临时单元, 只增不删 (审计需要)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: i64,
    pub batch_id: i64,
    pub transaction_date: NaiveDate,
    pub depositor_name: String,
    pub amount: i64,
    pub memo: String,
    pub matched_member_id: Option<i64>,
    pub status: RecordStatus,
    pub error_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use RecordStatus::*;

    #[test]
    fn terminal_states_never_leave() {
        for from in [Confirmed, Skipped] {
            for to in [Pending, Matched, Error, Confirmed, Skipped] {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn confirmed_record_cannot_be_confirmed_again() {
        // 确认事务内的状态复核依赖这一判定:
        // 并发双重确认的后到者读到 CONFIRMED 后必须被拒
        assert!(!Confirmed.can_transition_to(Confirmed));
        assert!(!Skipped.can_transition_to(Confirmed));
    }

    #[test]
    fn matched_and_error_reachable_from_each_other() {
        assert!(Matched.can_transition_to(Error));
        assert!(Error.can_transition_to(Matched));
    }

    #[test]
    fn non_terminal_states_can_confirm_or_skip() {
        for from in [Pending, Matched, Error] {
            assert!(from.can_transition_to(Confirmed));
            assert!(from.can_transition_to(Skipped));
        }
    }
}
