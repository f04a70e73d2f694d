mod common;

use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use auditflow::create_app;

use common::*;

#[tokio::test]
async fn health_reports_db_status() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool).await?;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX).await?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)?;
    assert_eq!(value["status"], "ok");
    assert_eq!(value["db_ok"], true);
    Ok(())
}
