//! The linkboard backend server.

use clap::Parser;
use std::{env, sync::Arc};

use crate::{
    args::{Args, Command},
    auth::AuthService,
    config::Config,
    prelude::*,
    store::Store,
};

mod api;
mod args;
mod auth;
mod cmd;
mod config;
mod db;
mod http;
mod logger;
mod model;
mod prelude;
mod store;
mod util;


#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Log error in case stdout is not connected and it is logged into a file.
        error!("{:?}", e);

        // Show a somewhat nice representation of the error
        eprintln!();
        eprintln!();
        bunt::eprintln!("{$red}▶▶▶ {$bold}Error:{/$}{/$} {[yellow+intense]}", e);
        eprintln!();
        if e.chain().len() > 1 {
            bunt::eprintln!("{$red+italic}Caused by:{/$}");
        }

        for (i, cause) in e.chain().skip(1).enumerate() {
            eprint!(" {: >1$}", "", i * 2);
            eprintln!("‣ {cause}");
        }

        std::process::exit(1);
    }
}

/// Main entry point.
async fn run() -> Result<()> {
    // If `RUST_BACKTRACE` wasn't already set, we default to `1`. Panics are
    // not expected to happen regularly, and when they do, the backtrace is
    // what we want to see.
    if env::var("RUST_BACKTRACE") == Err(env::VarError::NotPresent) {
        env::set_var("RUST_BACKTRACE", "1");
    }

    let args = Args::parse();

    // Configure output via `bunt`
    bunt::set_stdout_color_choice(args.stdout_color());
    bunt::set_stderr_color_choice(args.stderr_color());


    // Dispatch subcommand.
    match &args.cmd {
        Command::Serve { shared } => {
            let config = load_config_and_init_logger(shared, &args)?;
            start_server(config).await?;
        }
        Command::Db { cmd, shared } => {
            let config = load_config_and_init_logger(shared, &args)?;
            db::cmd::run(cmd, &config).await?;
        }
        Command::Check { shared } => cmd::check::run(shared, &args).await?,
        Command::WriteConfig { target } => config::write_template(target.as_ref())?,
        Command::ExportApiSchema { args } => cmd::export_api_schema::run(args)?,
    }

    Ok(())
}

async fn start_server(config: Config) -> Result<()> {
    info!("Starting linkboard {} ...", env!("CARGO_PKG_VERSION"));
    trace!("Configuration: {:#?}", config);

    let pool = db::create_pool(&config.db).await
        .context("failed to create database connection pool (database not running?)")?;
    db::migrate(&mut pool.get().await?).await
        .context("failed to check/run DB migrations")?;

    let store: Arc<dyn Store> = Arc::new(db::PgStore::new(pool));
    let auth = Arc::new(AuthService::new(&config.auth)?);

    let root_node = api::root_node();
    tokio::select! {
        res = http::serve(&config.http, root_node, store, auth) => {
            res.context("failed to start HTTP server")?;
        }
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for shutdown signal")?;
            info!("Received shutdown signal, stopping linkboard");
        }
    }

    Ok(())
}


pub(crate) fn load_config_and_init_logger(shared: &args::Shared, args: &Args) -> Result<Config> {
    // Load configuration.
    let (config, path) = match &shared.config {
        Some(path) => {
            let config = Config::load_from(path)
                .context(format!("failed to load config from '{}'", path.display()))?;
            (config, path.clone())
        }
        None => Config::from_env_or_default_locations()?,
    };

    // Initialize logger. Unfortunately, we can only do this here
    // after reading the config.
    logger::init(&config.log, args, args.cmd.log_name())?;
    info!("Loaded config from '{}'", path.display());

    Ok(config)
}
