use std::env;

use anyhow::{anyhow, bail, Context, Result};
use diesel::prelude::*;
use tracing_subscriber::EnvFilter;

use sikat::{
    auth::{password::hash_password, Role},
    config::AppConfig,
    db,
    models::NewUser,
    schema::{documents, users},
    storage::build_storage,
};

const USAGE: &str = "Usage:
  maintenance hash-password <password>
  maintenance create-user <username> <nip> <role> <full_name> <password>
  maintenance check-blobs";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("hash-password") => {
            let password = args.get(1).ok_or_else(|| anyhow!("missing <password>\n{USAGE}"))?;
            println!("{}", hash_password(password)?);
        }
        Some("create-user") => create_user(&args[1..])?,
        Some("check-blobs") => {
            let dangling = check_blobs().await?;
            if dangling > 0 {
                std::process::exit(1);
            }
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn create_user(args: &[String]) -> Result<()> {
    let [username, nip, role, full_name, password] = args else {
        bail!("create-user expects 5 arguments\n{USAGE}");
    };
    let role: Role = role.parse()?;

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    let mut conn = pool.get().context("failed to get database connection")?;

    let user = NewUser {
        username: username.trim().to_string(),
        password_hash: hash_password(password)?,
        full_name: full_name.trim().to_string(),
        nip: nip.trim().to_string(),
        role: role.as_str().to_string(),
        email: None,
        phone: None,
    };

    let id: i64 = diesel::insert_into(users::table)
        .values(&user)
        .returning(users::id)
        .get_result(&mut conn)
        .context("failed to insert user")?;

    println!("Created {role} user '{}' with id {id}.", user.username);
    Ok(())
}

/// Prints every document whose blob is missing and returns how many there were.
async fn check_blobs() -> Result<usize> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        storage_backend = ?config.storage_backend,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = build_storage(&config).await?;

    let rows: Vec<(i64, String)> = {
        let mut conn = pool.get().context("failed to get database connection")?;
        documents::table
            .select((documents::id, documents::file_path))
            .order(documents::id.asc())
            .load(&mut conn)
            .context("failed to load documents")?
    };

    let mut dangling = 0;
    for (id, locator) in &rows {
        let present = storage
            .exists(locator)
            .await
            .with_context(|| format!("failed to check blob for document {id}"))?;
        if !present {
            dangling += 1;
            println!("document {id}: missing blob {locator}");
        }
    }

    println!("Checked {} documents, {dangling} dangling.", rows.len());
    Ok(dangling)
}
