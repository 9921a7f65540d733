use crate::error::ReconcileError;
use crate::models::{
    BulkConfirmOutcome, ConfirmOutcome, DepositRow, IngestOutcome, PaymentRecord,
};
use crate::service::ReconcileService;
use axum::{
    extract::{Json, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 请求体: 批次导入
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub club_id: i64,
    pub year: i32,
    pub file_name: String,
    pub rows: Vec<DepositRow>,
}

/// 请求体: 人工改派
#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub record_id: i64,
    pub member_id: Option<i64>,
}

/// 请求体: 单条确认 (显式月份)
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub record_id: i64,
    pub year: i32,
    pub months: Vec<u32>,
    pub admin_id: i64,
}

/// 请求体: 跳过
#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    pub record_id: i64,
}

/// 请求体: 批量确认 (月份自动分配)
#[derive(Debug, Deserialize)]
pub struct BulkConfirmRequest {
    pub record_ids: Vec<i64>,
    pub year: i32,
    pub admin_id: i64,
}

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

fn ok<T: Serialize>(message: String, data: T) -> Response {
    let response = ApiResponse {
        success: true,
        message,
        data: Some(data),
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn fail<T: Serialize>(e: ReconcileError) -> Response {
    let response: ApiResponse<T> = ApiResponse {
        success: false,
        message: e.to_string(),
        data: None,
    };
    (error_status(&e), Json(response)).into_response()
}

/// 结构性错误 -> HTTP 状态码; 行级问题不走这里 (已折叠进 200 响应数据)
fn error_status(e: &ReconcileError) -> StatusCode {
    match e {
        ReconcileError::BatchNotFound(_)
        | ReconcileError::RecordNotFound(_)
        | ReconcileError::MemberNotFound(_) => StatusCode::NOT_FOUND,
        ReconcileError::Storage(_) | ReconcileError::Export(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

/// 批次导入接口
pub async fn ingest_batch(
    State(service): State<Arc<ReconcileService>>,
    Json(req): Json<IngestRequest>,
) -> Response {
    match service
        .ingest_batch(req.club_id, req.year, &req.file_name, &req.rows)
        .await
    {
        Ok(outcome) => {
            let message = format!(
                "ingested {} rows: {} matched, {} error, {} pending",
                outcome.summary.total,
                outcome.summary.matched,
                outcome.summary.error,
                outcome.summary.pending
            );
            ok(message, outcome)
        }
        Err(e) => fail::<IngestOutcome>(e),
    }
}

/// 人工改派接口
pub async fn reassign_record(
    State(service): State<Arc<ReconcileService>>,
    Json(req): Json<ReassignRequest>,
) -> Response {
    match service.reassign_record(req.record_id, req.member_id).await {
        Ok(record) => ok(format!("record {} reassigned", record.id), record),
        Err(e) => fail::<PaymentRecord>(e),
    }
}

/// 单条确认接口
pub async fn confirm_record(
    State(service): State<Arc<ReconcileService>>,
    Json(req): Json<ConfirmRequest>,
) -> Response {
    match service
        .confirm_record(req.record_id, req.year, &req.months, req.admin_id)
        .await
    {
        Ok(outcome) => ok(
            format!(
                "record {} confirmed, {} entries created",
                outcome.record.id,
                outcome.entries.len()
            ),
            outcome,
        ),
        Err(e) => fail::<ConfirmOutcome>(e),
    }
}

/// 跳过接口
pub async fn skip_record(
    State(service): State<Arc<ReconcileService>>,
    Json(req): Json<SkipRequest>,
) -> Response {
    match service.skip_record(req.record_id).await {
        Ok(record) => ok(format!("record {} skipped", record.id), record),
        Err(e) => fail::<PaymentRecord>(e),
    }
}

/// 批量确认接口
pub async fn bulk_confirm(
    State(service): State<Arc<ReconcileService>>,
    Json(req): Json<BulkConfirmRequest>,
) -> Response {
    match service
        .bulk_confirm(&req.record_ids, req.year, req.admin_id)
        .await
    {
        Ok(outcome) => ok(
            format!(
                "bulk confirm: {} succeeded, {} failed",
                outcome.success_ids.len(),
                outcome.failures.len()
            ),
            outcome,
        ),
        Err(e) => fail::<BulkConfirmOutcome>(e),
    }
}

/// 批次缴费条目 CSV 导出接口
pub async fn export_entries_csv(
    State(service): State<Arc<ReconcileService>>,
    Path(batch_id): Path<i64>,
) -> Response {
    match service.export_entries_csv(batch_id).await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/csv; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => fail::<()>(e),
    }
}
