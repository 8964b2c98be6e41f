use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use elunsad_access::{Role, RoleStore, SqliteRoleStore};

#[derive(Parser, Debug)]
#[command(author, version, about = "eLUNSAD access admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Grant the office-staff role to the account with this email
    GrantAdmin { email: String },
    /// Revoke the office-staff role from the account with this email
    RevokeAdmin { email: String },
    /// List the roles held by the account with this email
    ShowRoles { email: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Try to load env from CWD; when running in a container the binary CWD
    // may differ, so fall back to the crate-local `.env`.
    if dotenv().is_err() {
        let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(crate_env);
    }

    let cli = Cli::parse();

    match cli.command {
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
        Commands::GrantAdmin { email } => {
            let pool = get_pool().await?;
            let identity_id = find_user_id(&pool, &email).await?;
            let store = SqliteRoleStore::new(pool);
            let outcome = store.grant_role(identity_id, Role::OfficeStaff).await?;
            println!("{}: {:?}", email, outcome);
        }
        Commands::RevokeAdmin { email } => {
            let pool = get_pool().await?;
            let identity_id = find_user_id(&pool, &email).await?;
            let store = SqliteRoleStore::new(pool);
            let outcome = store.revoke_role(identity_id, Role::OfficeStaff).await?;
            println!("{}: {:?}", email, outcome);
        }
        Commands::ShowRoles { email } => {
            let pool = get_pool().await?;
            let identity_id = find_user_id(&pool, &email).await?;
            let store = SqliteRoleStore::new(pool);
            let assignments = store.list_assignments(identity_id).await?;
            if assignments.is_empty() {
                println!("{}: no roles", email);
            }
            for assignment in assignments {
                println!("{}: {} since {}", email, assignment.role, assignment.assigned_at);
            }
        }
    }

    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;
    Ok(pool)
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    let migrator = sqlx::migrate::Migrator::new(dir).await?;
    Ok(migrator)
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    let applied: HashSet<i64> = sqlx::query("SELECT version FROM _sqlx_migrations")
        .fetch_all(pool)
        .await
        .unwrap_or_default()
        .iter()
        .map(|row| row.get::<i64, _>("version"))
        .collect();

    for migration in migrator.iter() {
        let state = if applied.contains(&migration.version) { "applied" } else { "pending" };
        println!("{:>14} {} {}", migration.version, state, migration.description);
    }

    Ok(())
}

async fn find_user_id(pool: &SqlitePool, email: &str) -> anyhow::Result<Uuid> {
    let row = sqlx::query("SELECT id FROM users WHERE email = ? AND deleted_at IS NULL")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .with_context(|| format!("no account with email {email}"))?;

    let id: String = row.get("id");
    Uuid::parse_str(&id).context("malformed user id in store")
}
