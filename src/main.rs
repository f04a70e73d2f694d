use utoipa::OpenApi;

use auditflow::{app, db, models, routes};

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::health::health,
        routes::auth::register,
        routes::auth::login,
        routes::auth::me,
    ),
    components(schemas(
        routes::health::HealthResponse,
        models::user::User,
        models::user::AuthResponse,
        models::user::LoginRequest,
        models::user::RegisterRequest,
        models::tenant::Tenant,
        models::rbac::Role,
        models::rbac::Permission,
        models::rbac::RolePermission,
        models::rbac::EffectivePermissions,
        models::department::Campus,
        models::department::Department,
        models::finding::AuditFinding,
        models::finding::ClassificationRecord,
        models::corrective::CorrectiveAction,
        models::notification::Notification,
    )),
    tags(
        (name = "Auth", description = "Authentication"),
        (name = "RBAC", description = "Roles, permissions and bindings"),
        (name = "Org", description = "Campuses, departments, users"),
        (name = "Findings", description = "Audit findings and categorization"),
        (name = "Corrective Actions", description = "Five-step remediation workflow"),
        (name = "Notifications", description = "Notification inbox"),
        (name = "Health", description = "Service health")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let pool = db::init().await?;
    let app = app::create_app(pool).await?;

    let openapi = serde_json::to_value(ApiDoc::openapi())?;
    let docs_route = axum::Router::new().route(
        "/api-docs/openapi.json",
        axum::routing::get(move || {
            let doc = openapi.clone();
            async move { axum::Json(doc) }
        }),
    );
    let app = app.merge(docs_route);

    let port = std::env::var("APP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8000);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
