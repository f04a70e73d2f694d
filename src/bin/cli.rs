use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use auditflow::provisioning;
use auditflow::utils::parse_uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "auditflow admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new empty migration with the provided name
    MakeMigration { name: String },
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Roll back the last applied migration
    MigrateRollback,
    /// Upsert the static permission catalog into the database
    SyncCatalog,
    /// Create a tenant with its default roles and grants
    ProvisionTenant {
        name: String,
        domain: String,
    },
    /// Create a user inside an existing tenant
    CreateUser {
        /// Domain of the tenant to create the user in
        tenant_domain: String,
        name: String,
        email: String,
        password: String,
        /// Optional tenant role to bind globally, e.g. SYSTEM_ADMIN
        #[arg(long)]
        role: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in Docker the binary CWD may differ,
    // so fall back to the crate-local `.env` using CARGO_MANIFEST_DIR.
    if dotenv().is_err() {
        let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::MakeMigration { name } => {
            let path = make_migration_file(&name)?;
            println!("Created migration: {}", path.display());
        }
        Commands::MigrateRun => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        Commands::MigrateRollback => {
            let pool = get_pool().await?;
            let migrator = get_migrator().await?;
            migrator
                .undo(&pool, 1)
                .await
                .context("no migrations were rolled back")?;
            println!("Rolled back last migration");
        }
        Commands::SyncCatalog => {
            let pool = get_migrated_pool().await?;
            let count = provisioning::sync_catalog(&pool).await?;
            provisioning::verify_catalog(&pool).await?;
            println!("Catalog synced: {count} permissions");
        }
        Commands::ProvisionTenant { name, domain } => {
            let pool = get_migrated_pool().await?;
            let tenant = provisioning::provision_tenant(&pool, &name, &domain).await?;
            println!("Provisioned tenant {} ({})", tenant.domain, tenant.id);
        }
        Commands::CreateUser {
            tenant_domain,
            name,
            email,
            password,
            role,
        } => {
            let pool = get_migrated_pool().await?;
            let row = sqlx::query("SELECT id FROM tenants WHERE domain = ?")
                .bind(&tenant_domain)
                .fetch_optional(&pool)
                .await?
                .with_context(|| format!("no tenant with domain {tenant_domain}"))?;
            let tenant_id = parse_uuid(row.try_get("id")?, "tenants.id")?;

            let user =
                provisioning::create_user(&pool, tenant_id, &name, &email, &password, role.as_deref())
                    .await?;
            println!("Created user {} ({})", user.email, user.id);
        }
    }

    Ok(())
}

fn make_migration_file(name: &str) -> anyhow::Result<PathBuf> {
    let timestamp = Utc::now().format("%Y_%m_%d_%H%M%S");
    let sanitized = sanitize_name(name);
    let filename = format!("{}_{}.sql", timestamp, sanitized);
    let path = Path::new("migrations").join(filename);

    if path.exists() {
        anyhow::bail!("migration already exists: {}", path.display());
    }

    fs::write(&path, "-- Write your migration SQL here\n")
        .with_context(|| format!("failed to create migration at {}", path.display()))?;

    Ok(path)
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")
}

async fn get_migrated_pool() -> anyhow::Result<SqlitePool> {
    let pool = get_pool().await?;
    let migrator = get_migrator().await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    sqlx::migrate::Migrator::new(dir)
        .await
        .context("failed to load migrations directory")
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let table_exists = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_optional(pool)
    .await?;

    let applied_versions: HashSet<i64> = if table_exists.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let version = migration.version;
        let applied = applied_versions.contains(&version);
        let status = if applied { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        println!("{:<8} {:<20} {}", status, version, desc);
    }

    Ok(())
}
