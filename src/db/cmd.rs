use std::{
    io,
    os::unix::process::CommandExt,
    path::{Path, PathBuf},
    process::Command,
};
use secrecy::ExposeSecret;
use tokio_postgres::IsolationLevel;

use crate::{prelude::*, util::Never, config::Config};
use super::{DbConfig, DbConnection, create_pool, query};


#[derive(Debug, clap::Subcommand)]
pub(crate) enum DbCommand {
    /// Removes all data and tables from the database.
    Clear,

    /// Runs an `.sql` script with the configured database connection.
    Script {
        /// Path to a file containing an SQL script.
        script: PathBuf,
    },

    /// Runs the database migrations that also automatically run when starting
    /// the server.
    Migrate,

    /// Connects to the database and gives you an SQL prompt.
    /// This just starts the `psql` client, so make sure that is installed
    /// and accessible in your `PATH`.
    Console,

    /// Equivalent to `db clear` followed by `db migrate`.
    Reset,
}

/// Entry point for `db` commands.
pub(crate) async fn run(cmd: &DbCommand, config: &Config) -> Result<()> {
    if let DbCommand::Console = cmd {
        return console(&config.db).map(|_| ());
    }

    let pool = create_pool(&config.db).await?;
    let mut db = pool.get().await?;

    match cmd {
        DbCommand::Clear => clear(&mut db, config).await?,
        DbCommand::Migrate => super::migrate(&mut db).await?,
        DbCommand::Reset => {
            clear(&mut db, config).await?;
            super::migrate(&mut db).await?;
        }
        DbCommand::Script { script } => run_script(&db, script).await?,
        DbCommand::Console => unreachable!("already handled above"),
    }

    Ok(())
}


/// Tables created by our migrations, with what a row in them means.
const DATA_TABLES: &[(&str, &str)] = &[
    ("users", "registered users"),
    ("links", "posted links"),
    ("votes", "votes"),
];

/// Drops all linkboard data by removing and re-creating the `public` schema.
/// Shows what would be lost and asks for confirmation first.
async fn clear(db: &mut DbConnection, config: &Config) -> Result<()> {
    let tx = db.build_transaction()
        .isolation_level(IsolationLevel::Serializable)
        .start()
        .await?;

    println!();
    if let Ok(Ok(hostname)) = hostname::get().map(|n| n.into_string()) {
        println!("Running on:    {hostname}");
    }
    println!("Database:      '{}' on {}:{}", config.db.database, config.db.host, config.db.port);

    let tables = query::all_table_names(&*tx).await?;
    if tables.is_empty() {
        info!("The 'public' schema has no tables, nothing to clear");
        return Ok(());
    }

    println!();
    println!("linkboard data that will be deleted:");
    for (table, what) in DATA_TABLES {
        if tables.iter().any(|t| t.as_str() == *table) {
            let count = tx.query_one(&*format!("select count(*) from {table}"), &[])
                .await?
                .get::<_, i64>(0);
            println!("  {count:>8} {what}");
        }
    }

    let other = foreign_tables(&tables);
    if !other.is_empty() {
        warn!("The schema also contains tables not created by linkboard: {other:?}. \
            These are dropped as well!");
    }

    println!();
    println!("All users and their login credentials, links and votes will be gone for good. \
        Make sure this is the database you mean! Type 'yes' to drop the 'public' schema.");
    crate::cmd::prompt_for_yes()?;

    tx.execute("drop schema public cascade", &[]).await?;
    tx.execute("create schema public", &[]).await?;
    tx.execute(&*format!("grant all on schema public to \"{}\"", config.db.user), &[]).await?;
    tx.execute("grant all on schema public to public", &[]).await?;
    tx.commit().await.context("failed to commit clear transaction")?;

    info!("Cleared database '{}'", config.db.database);

    Ok(())
}

/// Returns all tables that are neither data tables nor the migration table.
fn foreign_tables(tables: &[String]) -> Vec<&str> {
    tables.iter()
        .map(String::as_str)
        .filter(|t| *t != "__db_migrations")
        .filter(|t| DATA_TABLES.iter().all(|(known, _)| known != t))
        .collect()
}

async fn run_script(db: &DbConnection, script_path: &Path) -> Result<()> {
    let script = tokio::fs::read_to_string(script_path)
        .await
        .context(format!("failed to read script file '{}'", script_path.display()))?;

    db.batch_execute(&script).await.context("failed to execute script")?;
    info!("Successfully ran SQL script");

    Ok(())
}

/// Replaces the current process with `psql`. Only returns on error.
fn console(config: &DbConfig) -> Result<Never> {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    let encode = |s| utf8_percent_encode(s, NON_ALPHANUMERIC);

    let connection_uri = format!(
        "postgresql://{}:{}@{}:{}/{}",
        encode(&config.user),
        encode(config.password.expose_secret()),
        config.host,
        config.port,
        encode(&config.database),
    );
    let error = Command::new("psql").arg(connection_uri).exec();
    let message = match error.kind() {
        io::ErrorKind::NotFound => "`psql` was not found in your `PATH`",
        io::ErrorKind::PermissionDenied => "you don't have sufficient permissions to execute `psql`",
        _ => "an error occured while trying to execute `psql`",
    };
    Err(error).context(message)
}
