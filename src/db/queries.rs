use sqlx::PgPool;
use std::collections::BTreeSet;

use crate::error::ReconcileError;
use crate::models::{
    CoupleGroup, FeeSchedule, Member, NewPaymentRecord, PaymentEntry, PaymentRecord, RecordStatus,
    UploadBatch,
};

/// 对账记录列 (别名对齐 FromRow 字段)
const RECORD_COLUMNS: &str = "fid AS id, fbatchid AS batch_id, ftransdate AS transaction_date, \
    fdepositorname AS depositor_name, famount AS amount, fmemo AS memo, \
    fmatchedmember AS matched_member_id, fstatus AS status, ferrorreason AS error_reason";

/// 缴费条目列
const ENTRY_COLUMNS: &str = "fid AS id, fmemberid AS member_id, frecordid AS payment_record_id, \
    fyear AS year, fmonth AS month, famount AS amount, fadminid AS confirmed_by_admin_id, \
    fconfirmedat AS confirmed_at";

/// 上传批次列
const BATCH_COLUMNS: &str = "fid AS id, fclubid AS club_id, fyear AS year, ffilename AS file_name, \
    fuploadedat AS uploaded_at, frecordcount AS record_count";

/// 查询年度会费标准
pub async fn get_fee_schedule(
    pool: &PgPool,
    club_id: i64,
    year: i32,
) -> Result<Option<FeeSchedule>, sqlx::Error> {
    sqlx::query_as::<_, FeeSchedule>(
        r#"
        SELECT fclubid AS club_id, fyear AS year,
               fregularamount AS regular_amount, fcoupleamount AS couple_amount
        FROM t_fee_schedule
        WHERE fclubid = $1 AND fyear = $2
        "#,
    )
    .bind(club_id)
    .bind(year)
    .fetch_optional(pool)
    .await
}

/// 俱乐部会员列表 (目录快照用, 每批次读一次)
pub async fn list_members(pool: &PgPool, club_id: i64) -> Result<Vec<Member>, sqlx::Error> {
    sqlx::query_as::<_, Member>(
        r#"
        SELECT fid AS id, fdisplayname AS display_name
        FROM t_member
        WHERE fclubid = $1
        ORDER BY fid
        "#,
    )
    .bind(club_id)
    .fetch_all(pool)
    .await
}

/// 俱乐部夫妻组列表
pub async fn list_couple_groups(
    pool: &PgPool,
    club_id: i64,
) -> Result<Vec<CoupleGroup>, sqlx::Error> {
    sqlx::query_as::<_, CoupleGroup>(
        r#"
        SELECT fid AS id, fmembera AS member_a, fmemberb AS member_b, fprimary AS primary_member
        FROM t_couple_group
        WHERE fclubid = $1
        ORDER BY fid
        "#,
    )
    .bind(club_id)
    .fetch_all(pool)
    .await
}

pub async fn get_member(pool: &PgPool, member_id: i64) -> Result<Option<Member>, sqlx::Error> {
    sqlx::query_as::<_, Member>(
        "SELECT fid AS id, fdisplayname AS display_name FROM t_member WHERE fid = $1",
    )
    .bind(member_id)
    .fetch_optional(pool)
    .await
}

/// 某会员所在的夫妻组 (无则为普通会员)
pub async fn get_couple_group_of(
    pool: &PgPool,
    member_id: i64,
) -> Result<Option<CoupleGroup>, sqlx::Error> {
    sqlx::query_as::<_, CoupleGroup>(
        r#"
        SELECT fid AS id, fmembera AS member_a, fmemberb AS member_b, fprimary AS primary_member
        FROM t_couple_group
        WHERE fmembera = $1 OR fmemberb = $1
        "#,
    )
    .bind(member_id)
    .fetch_optional(pool)
    .await
}

/// 创建上传批次并写入全部对账记录 (单事务)
///
/// 批次与记录要么同时落库要么全无 — 中途存储故障不得留下
/// record_count 与实际记录数不符的半截批次
pub async fn insert_batch_with_records(
    pool: &PgPool,
    club_id: i64,
    year: i32,
    file_name: &str,
    records: &[NewPaymentRecord],
) -> Result<(UploadBatch, Vec<PaymentRecord>), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let batch_query = format!(
        "INSERT INTO t_upload_batch (fclubid, fyear, ffilename, frecordcount) \
         VALUES ($1, $2, $3, $4) RETURNING {BATCH_COLUMNS}"
    );
    let batch = sqlx::query_as::<_, UploadBatch>(&batch_query)
        .bind(club_id)
        .bind(year)
        .bind(file_name)
        .bind(records.len() as i32)
        .fetch_one(&mut *tx)
        .await?;

    // 每 1000 条分块插入, 所有分块同属这一个事务
    let mut inserted = Vec::with_capacity(records.len());
    for chunk in records.chunks(1000) {
        let mut query_builder = sqlx::QueryBuilder::new(
            "INSERT INTO t_payment_record (
                fbatchid, ftransdate, fdepositorname, famount, fmemo,
                fmatchedmember, fstatus, ferrorreason
            ) ",
        );
        query_builder.push_values(chunk, |mut b, rec| {
            b.push_bind(batch.id)
                .push_bind(rec.transaction_date)
                .push_bind(&rec.depositor_name)
                .push_bind(rec.amount)
                .push_bind(&rec.memo)
                .push_bind(rec.matched_member_id)
                .push_bind(rec.status.as_str())
                .push_bind(&rec.error_reason);
        });
        query_builder.push(" RETURNING ");
        query_builder.push(RECORD_COLUMNS);

        let rows = query_builder
            .build_query_as::<PaymentRecord>()
            .fetch_all(&mut *tx)
            .await?;
        inserted.extend(rows);
    }

    tx.commit().await?;
    Ok((batch, inserted))
}

pub async fn get_batch(pool: &PgPool, batch_id: i64) -> Result<Option<UploadBatch>, sqlx::Error> {
    let query = format!("SELECT {BATCH_COLUMNS} FROM t_upload_batch WHERE fid = $1");
    sqlx::query_as::<_, UploadBatch>(&query)
        .bind(batch_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_record(
    pool: &PgPool,
    record_id: i64,
) -> Result<Option<PaymentRecord>, sqlx::Error> {
    let query = format!("SELECT {RECORD_COLUMNS} FROM t_payment_record WHERE fid = $1");
    sqlx::query_as::<_, PaymentRecord>(&query)
        .bind(record_id)
        .fetch_optional(pool)
        .await
}

/// 更新匹配结果与状态 (人工改派 / 重新校验)
pub async fn update_record_match(
    pool: &PgPool,
    record_id: i64,
    matched_member_id: Option<i64>,
    status: RecordStatus,
    error_reason: Option<&str>,
) -> Result<PaymentRecord, sqlx::Error> {
    let query = format!(
        "UPDATE t_payment_record \
         SET fmatchedmember = $2, fstatus = $3, ferrorreason = $4 \
         WHERE fid = $1 RETURNING {RECORD_COLUMNS}"
    );
    sqlx::query_as::<_, PaymentRecord>(&query)
        .bind(record_id)
        .bind(matched_member_id)
        .bind(status.as_str())
        .bind(error_reason)
        .fetch_one(pool)
        .await
}

/// 仅更新状态 (跳过)
pub async fn update_record_status(
    pool: &PgPool,
    record_id: i64,
    status: RecordStatus,
) -> Result<PaymentRecord, sqlx::Error> {
    let query = format!(
        "UPDATE t_payment_record SET fstatus = $2 WHERE fid = $1 RETURNING {RECORD_COLUMNS}"
    );
    sqlx::query_as::<_, PaymentRecord>(&query)
        .bind(record_id)
        .bind(status.as_str())
        .fetch_one(pool)
        .await
}

/// 一组会员某年度已缴的月份集合
pub async fn paid_months(
    pool: &PgPool,
    member_ids: &[i64],
    year: i32,
) -> Result<BTreeSet<u32>, sqlx::Error> {
    let rows: Vec<(i32,)> = sqlx::query_as(
        "SELECT fmonth FROM t_payment_entry WHERE fmemberid = ANY($1) AND fyear = $2",
    )
    .bind(member_ids)
    .bind(year)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(m,)| m as u32).collect())
}

/// 确认事务: 逐月写入缴费条目并翻转记录状态, 要么全部生效要么全部回滚
///
/// 事务内先对记录行加锁并复核状态 — 调用方的前置校验在事务外,
/// 两个并发确认 (如单条确认与批量确认撞同一记录) 都能通过外部检查,
/// 行锁让后到者在此读到 CONFIRMED 并以 InvalidTransition 回滚.
/// (fmemberid, fyear, fmonth) 唯一索引是跨记录并发的最终防线,
/// 事务内撞到 23505 折叠为 AlreadyPaid 而非存储故障
pub async fn commit_confirmation(
    pool: &PgPool,
    record_id: i64,
    member_id: i64,
    year: i32,
    months: &[u32],
    rate: i64,
    admin_id: i64,
) -> Result<(PaymentRecord, Vec<PaymentEntry>), ReconcileError> {
    let mut tx = pool.begin().await?;

    let lock_query =
        format!("SELECT {RECORD_COLUMNS} FROM t_payment_record WHERE fid = $1 FOR UPDATE");
    let current = sqlx::query_as::<_, PaymentRecord>(&lock_query)
        .bind(record_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(ReconcileError::RecordNotFound(record_id))?;
    if !current.status.can_transition_to(RecordStatus::Confirmed) {
        return Err(ReconcileError::InvalidTransition {
            from: current.status,
            to: RecordStatus::Confirmed,
        });
    }

    let insert_query = format!(
        "INSERT INTO t_payment_entry (fmemberid, frecordid, fyear, fmonth, famount, fadminid) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ENTRY_COLUMNS}"
    );
    let mut entries = Vec::with_capacity(months.len());
    for &month in months {
        let entry = sqlx::query_as::<_, PaymentEntry>(&insert_query)
            .bind(member_id)
            .bind(record_id)
            .bind(year)
            .bind(month as i32)
            .bind(rate)
            .bind(admin_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ReconcileError::from_insert_error(e, member_id, year, month))?;
        entries.push(entry);
    }

    let update_query = format!(
        "UPDATE t_payment_record \
         SET fstatus = $2, ferrorreason = NULL \
         WHERE fid = $1 RETURNING {RECORD_COLUMNS}"
    );
    let record = sqlx::query_as::<_, PaymentRecord>(&update_query)
        .bind(record_id)
        .bind(RecordStatus::Confirmed.as_str())
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok((record, entries))
}

/// 批次下已确认的缴费条目 (CSV 导出用)
pub async fn list_entries_for_batch(
    pool: &PgPool,
    batch_id: i64,
) -> Result<Vec<PaymentEntry>, sqlx::Error> {
    let query = format!(
        "SELECT e.fid AS id, e.fmemberid AS member_id, e.frecordid AS payment_record_id, \
                e.fyear AS year, e.fmonth AS month, e.famount AS amount, \
                e.fadminid AS confirmed_by_admin_id, e.fconfirmedat AS confirmed_at \
         FROM t_payment_entry e \
         INNER JOIN t_payment_record r ON r.fid = e.frecordid \
         WHERE r.fbatchid = $1 \
         ORDER BY e.fmemberid, e.fyear, e.fmonth"
    );
    sqlx::query_as::<_, PaymentEntry>(&query)
        .bind(batch_id)
        .fetch_all(pool)
        .await
}
