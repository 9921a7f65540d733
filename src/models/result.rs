use serde::{Deserialize, Serialize};

use super::entry::PaymentEntry;
use super::record::PaymentRecord;

/// 批次导入统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestSummary {
    pub total: usize,
    pub matched: usize,
    pub error: usize,
    pub pending: usize,
}

/// 批次导入结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub batch_id: i64,
    pub records: Vec<PaymentRecord>,
    pub summary: IngestSummary,
}

/// 单条确认结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub record: PaymentRecord,
    pub entries: Vec<PaymentEntry>,
}

/// 批量确认中单条记录的失败原因
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFailure {
    pub record_id: i64,
    pub reason: String,
}

/// 批量确认汇总: 部分失败不影响其余记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkConfirmOutcome {
    pub success_ids: Vec<i64>,
    pub failures: Vec<BulkFailure>,
}
