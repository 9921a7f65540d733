//! 需要真实 Postgres (已执行 schema.sql) 的对账集成测试.
//! 默认忽略; 运行: DATABASE_URL=postgres://... cargo test -- --ignored

use chrono::NaiveDate;
use club_fee_recon::models::{DepositRow, RecordStatus};
use club_fee_recon::{create_pool, ReconcileError, ReconcileService};
use sqlx::PgPool;

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a database with schema.sql applied");
    create_pool(&url).await.expect("connect")
}

/// 每次运行用独立俱乐部 id 隔离数据
fn fresh_club_id() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    (SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos() as i64)
        & 0x7fff_ffff_ffff
}

async fn insert_member(pool: &PgPool, club_id: i64, name: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO t_member (fclubid, fdisplayname) VALUES ($1, $2) RETURNING fid",
    )
    .bind(club_id)
    .bind(name)
    .fetch_one(pool)
    .await
    .expect("insert member")
}

async fn insert_schedule(pool: &PgPool, club_id: i64, year: i32, regular: i64, couple: i64) {
    sqlx::query(
        "INSERT INTO t_fee_schedule (fclubid, fyear, fregularamount, fcoupleamount) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(club_id)
    .bind(year)
    .bind(regular)
    .bind(couple)
    .execute(pool)
    .await
    .expect("insert schedule");
}

fn row(name: &str, amount: i64) -> DepositRow {
    DepositRow {
        transaction_date: NaiveDate::from_ymd_opt(2024, 1, 5).expect("date"),
        depositor_name: name.to_string(),
        amount,
        memo: String::new(),
    }
}

/// 已确认的记录用不相交的月份再确认一次也必须被拒 —
/// 唯一索引帮不上忙, 只能靠事务内的状态复核拦截
#[tokio::test]
#[ignore = "requires a live Postgres with schema.sql applied"]
async fn second_confirm_of_same_record_is_rejected() {
    let pool = connect().await;
    let club_id = fresh_club_id();
    insert_member(&pool, club_id, "김철수").await;
    insert_schedule(&pool, club_id, 2024, 15000, 25000).await;

    let service = ReconcileService::new(pool.clone());
    let outcome = service
        .ingest_batch(club_id, 2024, "jan.xlsx", &[row("김철수", 45000)])
        .await
        .expect("ingest");
    let record = &outcome.records[0];
    assert_eq!(record.status, RecordStatus::Matched);

    let confirmed = service
        .confirm_record(record.id, 2024, &[1, 2, 3], 7)
        .await
        .expect("first confirm");
    assert_eq!(confirmed.entries.len(), 3);

    let err = service
        .confirm_record(record.id, 2024, &[4, 5, 6], 7)
        .await
        .expect_err("second confirm must fail");
    assert!(matches!(err, ReconcileError::InvalidTransition { .. }));

    // 守恒: 条目总额仍等于入账金额
    let total: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(famount), 0)::BIGINT FROM t_payment_entry WHERE frecordid = $1",
    )
    .bind(record.id)
    .fetch_one(&pool)
    .await
    .expect("sum entries");
    assert_eq!(total, 45000);
}

/// 费率缺失拒绝整批且不留任何批次/记录
#[tokio::test]
#[ignore = "requires a live Postgres with schema.sql applied"]
async fn missing_schedule_persists_nothing() {
    let pool = connect().await;
    let club_id = fresh_club_id();

    let service = ReconcileService::new(pool.clone());
    let err = service
        .ingest_batch(club_id, 2024, "jan.xlsx", &[row("아무개", 15000)])
        .await
        .expect_err("ingest must fail without a fee schedule");
    assert!(matches!(err, ReconcileError::MissingFeeSchedule { .. }));

    let batches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t_upload_batch WHERE fclubid = $1")
        .bind(club_id)
        .fetch_one(&pool)
        .await
        .expect("count batches");
    assert_eq!(batches, 0);
}

/// 批次与记录同事务落库: record_count 与实际行数一致
#[tokio::test]
#[ignore = "requires a live Postgres with schema.sql applied"]
async fn batch_record_count_matches_persisted_records() {
    let pool = connect().await;
    let club_id = fresh_club_id();
    insert_member(&pool, club_id, "김철수").await;
    insert_schedule(&pool, club_id, 2024, 15000, 25000).await;

    let service = ReconcileService::new(pool.clone());
    let outcome = service
        .ingest_batch(
            club_id,
            2024,
            "jan.xlsx",
            &[
                row("김철수", 15000),
                row("홍길동", 30000),
                row("누군가", 7777),
            ],
        )
        .await
        .expect("ingest");
    assert_eq!(outcome.summary.total, 3);

    let stored: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM t_payment_record WHERE fbatchid = $1")
            .bind(outcome.batch_id)
            .fetch_one(&pool)
            .await
            .expect("count records");
    assert_eq!(stored, 3);

    let declared: i32 =
        sqlx::query_scalar("SELECT frecordcount FROM t_upload_batch WHERE fid = $1")
            .bind(outcome.batch_id)
            .fetch_one(&pool)
            .await
            .expect("batch record count");
    assert_eq!(declared as i64, stored);
}
