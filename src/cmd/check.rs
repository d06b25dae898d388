//! A subcommand making sure various things are working. Useful before
//! starting or updating linkboard, to find as many problems as possible as
//! early as possible.

use secrecy::SecretString;

use crate::{
    args::{self, Args},
    auth::AuthService,
    config::Config,
    db,
    load_config_and_init_logger,
    model::Key,
    prelude::*,
};


pub(crate) async fn run(shared: &args::Shared, args: &Args) -> Result<()> {
    let config = load_config_and_init_logger(shared, args)
        .context("failed to load config: cannot proceed with `check` command")?;


    info!("Starting to verify various things...");
    let referenced_files = check_referenced_files(&config);
    let db = check_db(&config).await;
    let auth = check_auth(&config).await;
    info!("Done verifing various things");


    // Print summary after all log output
    let mut any_errors = false;
    println!();
    bunt::println!("{$bold+blue+intense}Summary{/$}");
    println!();
    print_outcome(&mut any_errors, "Load configuration", &Ok(()));
    print_outcome(&mut any_errors, "Checking all referenced files", &referenced_files);
    print_outcome(&mut any_errors, "Connection to DB & migration state", &db);
    print_outcome(&mut any_errors, "Token signing & password hashing", &auth);

    println!();
    if any_errors {
        bunt::println!("{$red+intense}➡  Errors have occured!{/$}");
        std::process::exit(1);
    } else {
        bunt::println!("{$green+intense}⮕  Everything OK{/$} \
            {$dimmed}(linkboard probably works in this environment){/$}");
        println!("   ");
        Ok(())
    }
}

fn print_outcome<T>(any_errors: &mut bool, label: &str, result: &Result<T>) {
    match result {
        Ok(_) => {
            bunt::println!(" ▸ {[bold+intense]}  {$green+bold}✔ ok{/$}", label);
        }
        Err(e) => {
            *any_errors = true;
            bunt::println!(" ▸ {[bold+intense]}  {$red+bold}✘ error{/$}", label);
            bunt::println!("      {$red}▶▶▶ {$bold}Error:{/$}{/$} {[yellow+intense]}", e);
            println!();
            bunt::println!("      {$red+italic}Caused by:{/$}");

            for (i, cause) in e.chain().skip(1).enumerate() {
                print!("       {: >1$}", "", i * 2);
                println!("‣ {cause}");
            }
            println!();
        }
    }
}

fn check_referenced_files(config: &Config) -> Result<()> {
    config.db.check_server_cert()?;

    if let Some(socket) = &config.http.unix_socket {
        let parent = socket.parent()
            .ok_or_else(|| anyhow!("unix socket path '{}' has no parent", socket.display()))?;
        if !parent.is_dir() {
            bail!("directory of unix socket '{}' does not exist", socket.display());
        }
    }

    Ok(())
}

/// Connects to the DB and reports how far its schema is behind. Does not
/// apply any migrations.
async fn check_db(config: &Config) -> Result<()> {
    let pool = db::create_pool(&config.db).await?;
    let mut conn = pool.get().await?;
    let tx = conn.build_transaction().read_only(true).start().await?;

    match db::MigrationPlan::build(&tx).await? {
        db::MigrationPlan::UpToDate => info!("Database schema is up to date"),
        db::MigrationPlan::EmptyDb => {
            info!("Database is empty, all migrations will run on startup");
        }
        db::MigrationPlan::Migrate { new_migrations } => {
            info!("{new_migrations} migrations will be applied on startup");
        }
    }

    tx.rollback().await?;
    Ok(())
}

/// Makes sure tokens can be signed and verified and that password hashing
/// works with the configured parameters.
async fn check_auth(config: &Config) -> Result<()> {
    let auth = AuthService::new(&config.auth)?;
    let token = auth.issue_token(Key(1));

    let mut headers = hyper::HeaderMap::new();
    headers.insert(hyper::header::AUTHORIZATION, format!("Bearer {token}").parse()?);
    let key = auth.resolve_caller_id(&headers)
        .map_err(|e| anyhow!("freshly issued token was rejected: {}", e.msg))?;
    if key != Key(1) {
        bail!("freshly issued token resolved to wrong user {key:?}");
    }

    let before = std::time::Instant::now();
    let hash = auth.hash_password(SecretString::from("correct horse battery staple")).await?;
    info!("Hashing a password takes {:.2?} with the configured parameters", before.elapsed());
    if hash.contains("correct horse") {
        bail!("password hash contains the plaintext password");
    }

    Ok(())
}
