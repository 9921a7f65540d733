use indexmap::IndexSet;
use sqlx::PgPool;
use std::collections::HashMap;

use crate::db::queries;
use crate::error::ReconcileError;
use crate::models::{
    BulkConfirmOutcome, BulkFailure, ConfirmOutcome, DepositRow, DirectorySnapshot, FeeSchedule,
    IngestOutcome, IngestSummary, MemberType, NewPaymentRecord, PaymentRecord, RecordStatus,
    UploadBatch,
};

use super::allocator::suggest_months;
use super::matcher::{resolve_depositor, MatchResolution};
use super::validator::{detect_member_type, matches_any_rate, validate_amount, RateHint};

/// 单行分类结果: 匹配 + 金额校验折叠为记录的初始状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub matched_member_id: Option<i64>,
    pub status: RecordStatus,
    pub error_reason: Option<String>,
}

/// 导入时的逐行分类 (纯函数, 快照与费率由调用方一次性读入)
///
/// 未匹配行: 金额能对上任一费率 → PENDING 等人工处理,
/// 对不上任何费率 → ERROR; 原因字符串记录具体情形
pub fn classify_row(
    row: &DepositRow,
    snapshot: &DirectorySnapshot,
    schedule: &FeeSchedule,
) -> Classification {
    match resolve_depositor(&row.depositor_name, snapshot) {
        MatchResolution::Matched { member_id, .. } => {
            let member_type = snapshot.member_type(member_id);
            let check = validate_amount(row.amount, schedule, member_type);
            if check.is_valid {
                Classification {
                    matched_member_id: Some(member_id),
                    status: RecordStatus::Matched,
                    error_reason: None,
                }
            } else {
                Classification {
                    matched_member_id: Some(member_id),
                    status: RecordStatus::Error,
                    error_reason: check.error,
                }
            }
        }
        MatchResolution::Ambiguous { candidates } => classify_unmatched(
            row.amount,
            schedule,
            format!("ambiguous depositor name ({candidates} candidate members)"),
        ),
        MatchResolution::NotFound => {
            classify_unmatched(row.amount, schedule, "no member matched".to_string())
        }
    }
}

fn classify_unmatched(amount: i64, schedule: &FeeSchedule, why: String) -> Classification {
    if matches_any_rate(amount, schedule) {
        let hint = match detect_member_type(amount, schedule) {
            RateHint::Regular => "amount fits the regular rate",
            RateHint::Couple => "amount fits the couple rate",
            RateHint::Undetermined => "amount fits more than one rate",
        };
        Classification {
            matched_member_id: None,
            status: RecordStatus::Pending,
            error_reason: Some(format!("{why}; {hint}")),
        }
    } else {
        Classification {
            matched_member_id: None,
            status: RecordStatus::Error,
            error_reason: Some(format!("{why}; amount matches no monthly rate")),
        }
    }
}

/// 对账编排服务: 导入 / 改派 / 确认 / 跳过 / 批量确认
pub struct ReconcileService {
    pool: PgPool,
}

impl ReconcileService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 导入一批规范化流水行
    ///
    /// 费率缺失直接拒绝整批 (任何记录都不可能校验通过), 不落任何数据.
    /// 目录与费率快照在批首读取一次, 批内所有行复用
    pub async fn ingest_batch(
        &self,
        club_id: i64,
        year: i32,
        file_name: &str,
        rows: &[DepositRow],
    ) -> Result<IngestOutcome, ReconcileError> {
        let schedule = queries::get_fee_schedule(&self.pool, club_id, year)
            .await?
            .ok_or(ReconcileError::MissingFeeSchedule { club_id, year })?;

        let members = queries::list_members(&self.pool, club_id).await?;
        let couple_groups = queries::list_couple_groups(&self.pool, club_id).await?;
        let snapshot = DirectorySnapshot::new(members, couple_groups);

        tracing::info!(
            "导入批次: club={} year={} rows={} members={}",
            club_id,
            year,
            rows.len(),
            snapshot.members.len()
        );

        let mut new_records = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let classification = classify_row(row, &snapshot, &schedule);
            new_records.push(NewPaymentRecord {
                transaction_date: row.transaction_date,
                depositor_name: row.depositor_name.clone(),
                amount: row.amount,
                memo: row.memo.clone(),
                matched_member_id: classification.matched_member_id,
                status: classification.status,
                error_reason: classification.error_reason,
            });

            let current = idx + 1;
            if current % 100 == 0 {
                tracing::info!("行分类进度: {}/{}", current, rows.len());
            }
        }

        // 批次与全部记录在同一事务内落库, 失败时无部分写入
        let (batch, records) =
            queries::insert_batch_with_records(&self.pool, club_id, year, file_name, &new_records)
                .await?;

        let summary = summarize(&records);
        tracing::info!(
            "导入完成: batch={} total={} matched={} error={} pending={}",
            batch.id,
            summary.total,
            summary.matched,
            summary.error,
            summary.pending
        );

        Ok(IngestOutcome {
            batch_id: batch.id,
            records,
            summary,
        })
    }

    /// 人工改派匹配会员 (传 None 则清除匹配)
    ///
    /// 已确认的记录不可变, 先于一切校验拒绝
    pub async fn reassign_record(
        &self,
        record_id: i64,
        new_member_id: Option<i64>,
    ) -> Result<PaymentRecord, ReconcileError> {
        let record = self.require_record(record_id).await?;
        if record.status.is_terminal() {
            return Err(ReconcileError::InvalidTransition {
                from: record.status,
                to: RecordStatus::Matched,
            });
        }

        let batch = self.require_batch(record.batch_id).await?;
        let schedule = queries::get_fee_schedule(&self.pool, batch.club_id, batch.year)
            .await?
            .ok_or(ReconcileError::MissingFeeSchedule {
                club_id: batch.club_id,
                year: batch.year,
            })?;

        let classification = match new_member_id {
            Some(member_id) => {
                queries::get_member(&self.pool, member_id)
                    .await?
                    .ok_or(ReconcileError::MemberNotFound(member_id))?;
                let (member_type, _) = self.member_context(member_id).await?;
                let check = validate_amount(record.amount, &schedule, member_type);
                if check.is_valid {
                    Classification {
                        matched_member_id: Some(member_id),
                        status: RecordStatus::Matched,
                        error_reason: None,
                    }
                } else {
                    Classification {
                        matched_member_id: Some(member_id),
                        status: RecordStatus::Error,
                        error_reason: check.error,
                    }
                }
            }
            None => classify_unmatched(
                record.amount,
                &schedule,
                "match cleared by operator".to_string(),
            ),
        };

        let updated = queries::update_record_match(
            &self.pool,
            record_id,
            classification.matched_member_id,
            classification.status,
            classification.error_reason.as_deref(),
        )
        .await?;

        tracing::info!(
            "改派记录 {}: member={:?} status={:?}",
            record_id,
            updated.matched_member_id,
            updated.status
        );
        Ok(updated)
    }

    /// 单条确认, 操作员显式指定月份
    ///
    /// 前置条件按序硬校验, 任一不满足即中止且无部分写入
    pub async fn confirm_record(
        &self,
        record_id: i64,
        year: i32,
        months: &[u32],
        admin_id: i64,
    ) -> Result<ConfirmOutcome, ReconcileError> {
        let record = self.require_record(record_id).await?;
        let member_id = record.matched_member_id.ok_or(ReconcileError::NotMatched)?;

        if !record.status.can_transition_to(RecordStatus::Confirmed) {
            return Err(ReconcileError::InvalidTransition {
                from: record.status,
                to: RecordStatus::Confirmed,
            });
        }

        let months = normalize_months(months)?;

        let batch = self.require_batch(record.batch_id).await?;
        let schedule = queries::get_fee_schedule(&self.pool, batch.club_id, year)
            .await?
            .ok_or(ReconcileError::MissingFeeSchedule {
                club_id: batch.club_id,
                year,
            })?;

        let (member_type, group_members) = self.member_context(member_id).await?;
        let rate = schedule.rate_for(member_type);
        if rate <= 0 || record.amount != rate * months.len() as i64 {
            return Err(ReconcileError::AmountMismatch {
                amount: record.amount,
                rate,
                months: months.len(),
            });
        }

        let paid = queries::paid_months(&self.pool, &group_members, year).await?;
        if let Some(&month) = months.iter().find(|m| paid.contains(m)) {
            return Err(ReconcileError::AlreadyPaid {
                member_id,
                year,
                month,
            });
        }

        let (record, entries) = queries::commit_confirmation(
            &self.pool, record_id, member_id, year, &months, rate, admin_id,
        )
        .await?;

        tracing::info!(
            "确认记录 {}: member={} year={} months={:?}",
            record_id,
            member_id,
            year,
            months
        );
        Ok(ConfirmOutcome { record, entries })
    }

    /// 跳过: 非会费入账的终态处理, 不产生缴费条目
    pub async fn skip_record(&self, record_id: i64) -> Result<PaymentRecord, ReconcileError> {
        let record = self.require_record(record_id).await?;
        if !record.status.can_transition_to(RecordStatus::Skipped) {
            return Err(ReconcileError::InvalidTransition {
                from: record.status,
                to: RecordStatus::Skipped,
            });
        }
        let updated = queries::update_record_status(&self.pool, record_id, RecordStatus::Skipped)
            .await?;
        tracing::info!("跳过记录 {}", record_id);
        Ok(updated)
    }

    /// 批量确认: 月份由分配器自动推导
    ///
    /// 每条记录单独一个事务提交, 单条失败进失败列表, 绝不拖垮其余记录;
    /// 多条记录也绝不合并进同一事务 — 部分失败隔离依赖这一点
    pub async fn bulk_confirm(
        &self,
        record_ids: &[i64],
        year: i32,
        admin_id: i64,
    ) -> Result<BulkConfirmOutcome, ReconcileError> {
        let unique_ids: IndexSet<i64> = record_ids.iter().copied().collect();
        let mut outcome = BulkConfirmOutcome::default();
        let mut schedule_cache: HashMap<i64, FeeSchedule> = HashMap::new();

        let total = unique_ids.len();
        tracing::info!("批量确认开始: {} 条记录, year={}", total, year);

        for (idx, &record_id) in unique_ids.iter().enumerate() {
            match self
                .bulk_confirm_one(record_id, year, admin_id, &mut schedule_cache)
                .await
            {
                Ok(()) => outcome.success_ids.push(record_id),
                // 记录级问题进失败列表, 存储故障向上传播中止整个操作
                Err(BulkStep::Rejected(reason)) => {
                    tracing::warn!("批量确认记录 {} 被拒: {}", record_id, reason);
                    outcome.failures.push(BulkFailure { record_id, reason });
                }
                Err(BulkStep::Abort(e)) => return Err(e),
            }

            let current = idx + 1;
            if current % 100 == 0 {
                tracing::info!(
                    "批量确认进度: {}/{}, 成功 {}, 失败 {}",
                    current,
                    total,
                    outcome.success_ids.len(),
                    outcome.failures.len()
                );
            }
        }

        tracing::info!(
            "批量确认完成: 成功 {}, 失败 {}",
            outcome.success_ids.len(),
            outcome.failures.len()
        );
        Ok(outcome)
    }

    /// 批量确认中的单条处理: 重新校验金额 (防陈旧数据) -> 取已缴月份 -> 分配 -> 提交
    async fn bulk_confirm_one(
        &self,
        record_id: i64,
        year: i32,
        admin_id: i64,
        schedule_cache: &mut HashMap<i64, FeeSchedule>,
    ) -> Result<(), BulkStep> {
        let record = queries::get_record(&self.pool, record_id)
            .await
            .map_err(storage_abort)?
            .ok_or_else(|| BulkStep::Rejected("record not found".to_string()))?;

        if record.status != RecordStatus::Matched {
            return Err(BulkStep::Rejected(format!(
                "record is {}, expected MATCHED",
                record.status.as_str()
            )));
        }
        let member_id = record
            .matched_member_id
            .ok_or_else(|| BulkStep::Rejected("record has no matched member".to_string()))?;

        let batch = queries::get_batch(&self.pool, record.batch_id)
            .await
            .map_err(storage_abort)?
            .ok_or(BulkStep::Abort(ReconcileError::BatchNotFound(
                record.batch_id,
            )))?;

        // 费率按俱乐部缓存, 缺失是配置问题, 中止整个操作
        let schedule = match schedule_cache.get(&batch.club_id) {
            Some(s) => s.clone(),
            None => {
                let s = queries::get_fee_schedule(&self.pool, batch.club_id, year)
                    .await
                    .map_err(storage_abort)?
                    .ok_or(BulkStep::Abort(ReconcileError::MissingFeeSchedule {
                        club_id: batch.club_id,
                        year,
                    }))?;
                schedule_cache.insert(batch.club_id, s.clone());
                s
            }
        };

        let (member_type, group_members) = self
            .member_context(member_id)
            .await
            .map_err(BulkStep::Abort)?;

        let check = validate_amount(record.amount, &schedule, member_type);
        if !check.is_valid {
            return Err(BulkStep::Rejected(
                check.error.unwrap_or_else(|| "invalid amount".to_string()),
            ));
        }

        let paid = queries::paid_months(&self.pool, &group_members, year)
            .await
            .map_err(storage_abort)?;
        let months = suggest_months(check.month_count, &paid);
        if (months.len() as u32) < check.month_count {
            return Err(BulkStep::Rejected(
                ReconcileError::AllocationInsufficient {
                    needed: check.month_count as usize,
                    available: months.len(),
                }
                .to_string(),
            ));
        }

        let rate = schedule.rate_for(member_type);
        match queries::commit_confirmation(
            &self.pool, record_id, member_id, year, &months, rate, admin_id,
        )
        .await
        {
            Ok(_) => Ok(()),
            // 并发竞争: 唯一索引按"已缴费"拒绝, 事务内状态复核按非法转移拒绝,
            // 两者都只拒绝该条, 不中止批次
            Err(
                e @ (ReconcileError::AlreadyPaid { .. }
                | ReconcileError::InvalidTransition { .. }),
            ) => Err(BulkStep::Rejected(e.to_string())),
            Err(e) => Err(BulkStep::Abort(e)),
        }
    }

    /// 批次已确认缴费条目导出为 CSV (无表头, 与 COPY 兼容)
    pub async fn export_entries_csv(&self, batch_id: i64) -> Result<Vec<u8>, ReconcileError> {
        self.require_batch(batch_id).await?;
        let entries = queries::list_entries_for_batch(&self.pool, batch_id).await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in &entries {
            writer
                .write_record(&[
                    entry.id.to_string(),
                    entry.member_id.to_string(),
                    entry.payment_record_id.to_string(),
                    entry.year.to_string(),
                    entry.month.to_string(),
                    entry.amount.to_string(),
                    entry.confirmed_by_admin_id.to_string(),
                    entry.confirmed_at.to_rfc3339(),
                ])
                .map_err(|e| ReconcileError::Export(e.to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| ReconcileError::Export(e.to_string()))
    }

    async fn require_record(&self, record_id: i64) -> Result<PaymentRecord, ReconcileError> {
        queries::get_record(&self.pool, record_id)
            .await?
            .ok_or(ReconcileError::RecordNotFound(record_id))
    }

    async fn require_batch(&self, batch_id: i64) -> Result<UploadBatch, ReconcileError> {
        queries::get_batch(&self.pool, batch_id)
            .await?
            .ok_or(ReconcileError::BatchNotFound(batch_id))
    }

    /// 会员类别与同组成员: 已缴月份按夫妻组合并统计
    async fn member_context(
        &self,
        member_id: i64,
    ) -> Result<(MemberType, Vec<i64>), ReconcileError> {
        match queries::get_couple_group_of(&self.pool, member_id).await? {
            Some(group) => Ok((MemberType::Couple, vec![group.member_a, group.member_b])),
            None => Ok((MemberType::Regular, vec![member_id])),
        }
    }
}

/// 批量确认单条的两类出口: 拒绝 (进失败列表) 或中止 (结构性失败)
enum BulkStep {
    Rejected(String),
    Abort(ReconcileError),
}

fn storage_abort(e: sqlx::Error) -> BulkStep {
    BulkStep::Abort(ReconcileError::Storage(e))
}

/// 月份选择规整: 非空、去重、1..=12、升序
fn normalize_months(months: &[u32]) -> Result<Vec<u32>, ReconcileError> {
    if months.is_empty() {
        return Err(ReconcileError::InvalidMonths(
            "no months selected".to_string(),
        ));
    }
    let mut sorted: Vec<u32> = months.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    if sorted.len() != months.len() {
        return Err(ReconcileError::InvalidMonths(
            "duplicate months selected".to_string(),
        ));
    }
    if let Some(&bad) = sorted.iter().find(|&&m| !(1..=12).contains(&m)) {
        return Err(ReconcileError::InvalidMonths(format!(
            "month {bad} outside 1..=12"
        )));
    }
    Ok(sorted)
}

fn summarize(records: &[PaymentRecord]) -> IngestSummary {
    let mut summary = IngestSummary {
        total: records.len(),
        ..Default::default()
    };
    for record in records {
        match record.status {
            RecordStatus::Matched => summary.matched += 1,
            RecordStatus::Error => summary.error += 1,
            RecordStatus::Pending => summary.pending += 1,
            RecordStatus::Confirmed | RecordStatus::Skipped => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoupleGroup, Member};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn schedule(regular: i64, couple: i64) -> FeeSchedule {
        FeeSchedule {
            club_id: 1,
            year: 2024,
            regular_amount: regular,
            couple_amount: couple,
        }
    }

    fn row(name: &str, amount: i64) -> DepositRow {
        DepositRow {
            transaction_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            depositor_name: name.to_string(),
            amount,
            memo: String::new(),
        }
    }

    fn snapshot() -> DirectorySnapshot {
        DirectorySnapshot::new(
            vec![
                Member {
                    id: 1,
                    display_name: "김철수".to_string(),
                },
                Member {
                    id: 2,
                    display_name: "박영희".to_string(),
                },
                Member {
                    id: 3,
                    display_name: "이순신".to_string(),
                },
            ],
            vec![CoupleGroup {
                id: 10,
                member_a: 1,
                member_b: 2,
                primary_member: 1,
            }],
        )
    }

    #[test]
    fn matched_member_with_clean_multiple_becomes_matched() {
        let c = classify_row(&row("이순신", 45000), &snapshot(), &schedule(15000, 25000));
        assert_eq!(c.status, RecordStatus::Matched);
        assert_eq!(c.matched_member_id, Some(3));
        assert_eq!(c.error_reason, None);
    }

    #[test]
    fn couple_member_validates_against_couple_rate() {
        // 김철수 属于夫妻组, 适用 couple 费率
        let c = classify_row(&row("김철수", 50000), &snapshot(), &schedule(15000, 25000));
        assert_eq!(c.status, RecordStatus::Matched);
        assert_eq!(c.matched_member_id, Some(1));
    }

    #[test]
    fn matched_member_with_remainder_becomes_error() {
        let c = classify_row(&row("이순신", 40000), &snapshot(), &schedule(15000, 25000));
        assert_eq!(c.status, RecordStatus::Error);
        assert_eq!(c.matched_member_id, Some(3));
        assert!(c.error_reason.as_deref().unwrap().contains("15000"));
    }

    #[test]
    fn unmatched_with_plausible_amount_stays_pending() {
        let c = classify_row(&row("홍길동", 30000), &snapshot(), &schedule(15000, 25000));
        assert_eq!(c.status, RecordStatus::Pending);
        assert_eq!(c.matched_member_id, None);
        let reason = c.error_reason.unwrap();
        assert!(reason.contains("no member matched"));
        assert!(reason.contains("regular"));
    }

    #[test]
    fn unmatched_with_implausible_amount_becomes_error() {
        let c = classify_row(&row("홍길동", 7777), &snapshot(), &schedule(15000, 25000));
        assert_eq!(c.status, RecordStatus::Error);
        assert!(c
            .error_reason
            .unwrap()
            .contains("amount matches no monthly rate"));
    }

    #[test]
    fn ambiguous_name_is_reported_as_such() {
        let snap = DirectorySnapshot::new(
            vec![
                Member {
                    id: 1,
                    display_name: "김철수".to_string(),
                },
                Member {
                    id: 2,
                    display_name: "김철호".to_string(),
                },
            ],
            vec![],
        );
        let c = classify_row(&row("김철", 15000), &snap, &schedule(15000, 25000));
        assert_eq!(c.matched_member_id, None);
        assert!(c.error_reason.unwrap().contains("ambiguous"));
    }

    #[test]
    fn month_normalization_rejects_bad_selections() {
        assert!(matches!(
            normalize_months(&[]),
            Err(ReconcileError::InvalidMonths(_))
        ));
        assert!(matches!(
            normalize_months(&[1, 1, 2]),
            Err(ReconcileError::InvalidMonths(_))
        ));
        assert!(matches!(
            normalize_months(&[0, 3]),
            Err(ReconcileError::InvalidMonths(_))
        ));
        assert!(matches!(
            normalize_months(&[3, 13]),
            Err(ReconcileError::InvalidMonths(_))
        ));
        assert_eq!(normalize_months(&[3, 1, 2]).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn summary_counts_by_status() {
        let mk = |id, status| PaymentRecord {
            id,
            batch_id: 1,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            depositor_name: "x".to_string(),
            amount: 15000,
            memo: String::new(),
            matched_member_id: None,
            status,
            error_reason: None,
        };
        let records = vec![
            mk(1, RecordStatus::Matched),
            mk(2, RecordStatus::Matched),
            mk(3, RecordStatus::Error),
            mk(4, RecordStatus::Pending),
        ];
        let summary = summarize(&records);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.error, 1);
        assert_eq!(summary.pending, 1);
    }

    /// 端到端场景的纯函数部分: 同一会员同金额的第二笔入账,
    /// 首三个月已确认后分配器必须自动跳到 4,5,6
    #[test]
    fn repeated_payment_allocates_later_months() {
        let s = schedule(15000, 25000);
        let c = classify_row(&row("이순신", 45000), &snapshot(), &s);
        assert_eq!(c.status, RecordStatus::Matched);

        let check = validate_amount(45000, &s, MemberType::Regular);
        assert_eq!(check.month_count, 3);

        let first = suggest_months(check.month_count, &BTreeSet::new());
        assert_eq!(first, vec![1, 2, 3]);

        let paid: BTreeSet<u32> = first.into_iter().collect();
        let second = suggest_months(check.month_count, &paid);
        assert_eq!(second, vec![4, 5, 6]);

        // 守恒: 每月条目金额 x 月数 = 入账金额
        assert_eq!(
            s.rate_for(MemberType::Regular) * second.len() as i64,
            45000
        );
    }
}
