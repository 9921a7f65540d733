use axum::{
    routing::{get, post},
    Router,
};
use club_fee_recon::{api, create_pool, AppConfig, ReconcileService};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .init();

    // 加载配置
    let config = AppConfig::from_env();
    info!("Starting server with config: {:?}", config);

    // 创建数据库连接池
    let pool = create_pool(&config.database.url).await?;
    info!("Database pool created");

    // 对账服务
    let service = Arc::new(ReconcileService::new(pool));

    // 构建路由
    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/api/recon/ingest", post(api::ingest_batch))
        .route("/api/recon/records/reassign", post(api::reassign_record))
        .route("/api/recon/records/confirm", post(api::confirm_record))
        .route("/api/recon/records/skip", post(api::skip_record))
        .route("/api/recon/bulk-confirm", post(api::bulk_confirm))
        .route(
            "/api/recon/batches/:batch_id/entries.csv",
            get(api::export_entries_csv),
        )
        .layer(ServiceBuilder::new())
        .with_state(service);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Server listening on {}", addr);
    info!("API Endpoints:");
    info!("  POST /api/recon/ingest                    - ingest a normalized deposit batch");
    info!("  POST /api/recon/records/reassign          - manually reassign a record");
    info!("  POST /api/recon/records/confirm           - confirm one record (explicit months)");
    info!("  POST /api/recon/records/skip              - skip a non-fee deposit");
    info!("  POST /api/recon/bulk-confirm              - bulk confirm (auto month allocation)");
    info!("  GET  /api/recon/batches/:id/entries.csv   - export confirmed entries");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
