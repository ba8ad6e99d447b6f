use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keygate::auth::KEY_HASH_LEN;
use keygate::db::{ConnectionDescriptor, SqliteAdmin};
use keygate::{
    AuthGateway, BackendKind, CredentialStore, KeygateConfig, ServerAdministrator, UserPrivileges,
    generate_api_key, hash_api_key,
};

#[derive(Parser)]
#[command(name = "keygate")]
#[command(about = "API key store and authentication gateway")]
struct Cli {
    /// Path to keygate.json (default: KEYGATE_CONFIG, XDG config dir, ./keygate.json)
    #[arg(long, global = true, env = "KEYGATE_CONFIG")]
    config: Option<PathBuf>,
    /// Deployment environment; `development` disables key validation
    #[arg(long, global = true, env = "KEYGATE_ENVIRONMENT")]
    environment: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API behind the API key gateway
    Serve {
        /// Bind address, e.g. 0.0.0.0:8080
        #[arg(long, default_value = "127.0.0.1:8080", env = "KEYGATE_BIND")]
        bind: String,
        /// Skip schema initialization at startup
        #[arg(long, default_value_t = false)]
        no_init: bool,
    },
    /// Create the database, table and stored procedures
    Init,
    /// Generate a new API key for an owner and store its hash
    CreateKey {
        owner: String,
        #[arg(long, default_value_t = 0)]
        key_type: i32,
    },
    /// Store the hash of an existing raw key (read from KEYGATE_RAW_KEY or the argument)
    StoreKey {
        owner: String,
        #[arg(long, env = "KEYGATE_RAW_KEY", hide_env_values = true)]
        key: String,
        #[arg(long, default_value_t = 0)]
        key_type: i32,
    },
    /// List the active keys of an owner
    ListKeys { owner: String },
    /// Deactivate a key, given its hash or (with --raw) the raw key
    RevokeKey {
        key: String,
        #[arg(long, default_value_t = false)]
        raw: bool,
    },
    /// Create a login/user on the hosted server
    CreateUser {
        username: String,
        #[arg(long, env = "KEYGATE_USER_PASSWORD", hide_env_values = true)]
        password: String,
        /// none, read, write, readwrite or admin
        #[arg(long, default_value = "read")]
        privileges: UserPrivileges,
        /// Grant on this database only (server-wide when omitted)
        #[arg(long)]
        database: Option<String>,
    },
    /// Delete a login/user from the hosted server
    DeleteUser { username: String },
    /// List users with access to a database
    ListUsers { database: String },
    /// Drop a database (embedded backend: delete the file)
    DeleteDatabase {
        /// Database name; defaults to the configured one
        name: Option<String>,
    },
}

/// `RUST_LOG` plus the crate defaults; driver chatter is kept at warn.
fn log_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("keygate=info".parse()?)
        .add_directive("sqlx=warn".parse()?)
        .add_directive("tiberius=warn".parse()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(log_filter()?).init();

    let cli = Cli::parse();

    let mut config = KeygateConfig::load(cli.config.as_deref())?;
    if let Some(environment) = cli.environment {
        config.gateway.environment = Some(environment);
    }

    match cli.command {
        Commands::Serve { bind, no_init } => {
            let store = config.build_store()?;
            info!(
                backend = %store.backend(),
                database = ?store.database_name(),
                "Starting keygate server on {}",
                bind
            );

            if !no_init && !store.initialize_schema().await {
                bail!("Schema initialization failed for the {} backend", store.backend());
            }

            let gateway = AuthGateway::new(store, config.gateway_config());
            let app = keygate::api::create_router(gateway);
            keygate::api::serve(&bind, app).await?;
        }
        Commands::Init => {
            let store = config.build_store()?;
            info!(backend = %store.backend(), "Initializing credential schema...");
            if !store.initialize_schema().await {
                bail!("Schema initialization failed");
            }
            info!("Credential schema initialized successfully");
        }
        Commands::CreateKey { owner, key_type } => {
            let store = config.build_store()?;
            let raw_key = generate_api_key();

            if !store.store_credential(&raw_key, &owner, key_type).await {
                bail!("Failed to store the new key (is the schema initialized?)");
            }

            let hash = hash_api_key(&raw_key);
            println!("API Key created successfully!");
            println!();
            println!("  Key:      {}", raw_key);
            println!("  Hash:     {}", hash);
            println!("  Owner:    {}", owner);
            println!("  Key type: {}", key_type);
            println!();
            println!("IMPORTANT: Save this key now. It cannot be retrieved later.");
            println!("Use with: -H 'X-API-KEY: {}'", raw_key);
        }
        Commands::StoreKey {
            owner,
            key,
            key_type,
        } => {
            let store = config.build_store()?;
            if !store.store_credential(&key, &owner, key_type).await {
                bail!("Failed to store key");
            }
            println!("Stored key {} for '{}'.", hash_api_key(&key).short(), owner);
        }
        Commands::ListKeys { owner } => {
            let store = config.build_store()?;
            let records = store.list_by_owner(&owner).await;

            if records.is_empty() {
                println!("No active keys found for '{}'.", owner);
                return Ok(());
            }

            println!("{:<66} {:<10} {:<25}", "HASH", "TYPE", "CREATED");
            println!("{}", "-".repeat(100));
            for record in records {
                let created = record
                    .created_at
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{:<66} {:<10} {:<25}", record.hash.as_str(), record.key_type, created);
            }
        }
        Commands::RevokeKey { key, raw } => {
            let store = config.build_store()?;
            let hash = if raw {
                hash_api_key(&key)
            } else if key.len() == KEY_HASH_LEN && key.chars().all(|c| c.is_ascii_hexdigit()) {
                keygate::KeyHash::new(key.to_ascii_lowercase())
            } else {
                bail!(
                    "Expected a {}-character hex hash; pass --raw to revoke by raw key",
                    KEY_HASH_LEN
                );
            };

            if store.set_active(&hash, false).await {
                println!("API key {} has been revoked.", hash.short());
            } else {
                println!("No API key found with hash {}.", hash.short());
            }
        }
        Commands::CreateUser {
            username,
            password,
            privileges,
            database,
        } => {
            let admin = config.build_admin()?;
            if !admin
                .create_user(&username, &password, privileges, database.as_deref())
                .await
            {
                bail!("Failed to create user '{}'", username);
            }
            println!("User '{}' created with {} privileges.", username, privileges);
        }
        Commands::DeleteUser { username } => {
            let admin = config.build_admin()?;
            if !admin.delete_user(&username).await {
                bail!("Failed to delete user '{}'", username);
            }
            println!("User '{}' deleted.", username);
        }
        Commands::ListUsers { database } => {
            let admin = config.build_admin()?;
            let users = admin.list_users(&database).await;
            if users.is_empty() {
                println!("No users found for '{}'.", database);
            }
            for user in users {
                println!("{}", user);
            }
        }
        Commands::DeleteDatabase { name } => match config.backend {
            BackendKind::Sqlite => {
                let mut location = config.sqlite_location()?;
                if let Some(name) = name {
                    location = location.with_file_name(name);
                }
                if !SqliteAdmin::delete_database(&location.path()) {
                    bail!("Failed to delete {}", location.path().display());
                }
                println!("Deleted {}.", location.path().display());
            }
            _ => {
                let descriptor = config.hosted_descriptor()?;
                let target = match name {
                    Some(name) => name,
                    None => match descriptor.as_descriptor().database() {
                        Some(db) => db.to_string(),
                        None => bail!("No database name given or configured"),
                    },
                };
                warn!(database = %target, "Dropping database");
                let admin = keygate::db::server_admin(descriptor);
                if !admin.delete_database(&target).await {
                    bail!("Failed to drop database '{}'", target);
                }
                println!("Database '{}' dropped.", target);
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_keeps_directives() {
        let filter = log_filter().unwrap().to_string().to_ascii_lowercase();
        assert!(filter.contains("keygate=info"));
        assert!(filter.contains("sqlx=warn"));
        assert!(filter.contains("tiberius=warn"));
    }
}
