use chrono::{DateTime, Utc};
use deadpool_postgres::Transaction;
use once_cell::sync::Lazy;
use std::{collections::BTreeMap, time::Duration, num::NonZeroU64};
use tokio_postgres::{IsolationLevel, error::SqlState};

use crate::{prelude::*, db::util::dbargs};
use super::DbConnection;


/// Describes the actions needed to bring the database into a state that we
/// expect.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MigrationPlan {
    /// The database is completely empty: we need to create the meta table and
    /// apply all migrations.
    EmptyDb,

    /// The database is completely up to date and all migrations match.
    UpToDate,

    /// The DB can be migrated to the state we expect by applying that many new
    /// migrations.
    Migrate {
        new_migrations: NonZeroU64,
    },
}

/// A migration as recorded in the `__db_migrations` table.
#[derive(Debug)]
struct AppliedMigration {
    name: String,
    applied_on: DateTime<Utc>,
    script: String,
}

impl MigrationPlan {
    /// Builds a migration plan by querying the current state of the DB. If the
    /// DB is in a state that we cannot fix, `Err` is returned. Does not modify
    /// the DB.
    pub(crate) async fn build(tx: &Transaction<'_>) -> Result<Self> {
        if !super::query::does_table_exist(&**tx, "__db_migrations").await? {
            // Other tables without the meta table means someone else owns
            // this database.
            let tables = super::query::all_table_names(&**tx).await?;
            if !tables.is_empty() {
                bail!(
                    "migration table '__db_migrations' does not exist, but some other \
                        tables ({}) do exist. This should not happen.",
                    tables.join(", "),
                );
            }

            return Ok(Self::EmptyDb);
        }

        debug!("Checking DB migrations");
        let applied = tx
            .query_raw("select id, name, applied_on, script from __db_migrations", dbargs![])
            .await
            .context("failed to query meta migrations table")?
            .map_ok(|row| (
                row.get::<_, i64>(0) as u64,
                AppliedMigration {
                    name: row.get(1),
                    applied_on: row.get(2),
                    script: row.get(3),
                },
            ))
            .try_collect::<BTreeMap<_, _>>()
            .await?;

        Self::compare(&applied, &MIGRATIONS)
    }

    /// Compares the migrations found in the DB with the ones this binary
    /// knows about.
    fn compare(
        applied: &BTreeMap<u64, AppliedMigration>,
        known: &BTreeMap<u64, Migration>,
    ) -> Result<Self> {
        if !applied.keys().copied().eq(1..applied.len() as u64 + 1) {
            bail!("The IDs of the active migrations are not consecutive. This is unexpected.");
        }

        for (id, actual) in applied {
            let expected = known.get(id).ok_or_else(|| anyhow!(
                "The migration '{}-{}' is active in the database (applied on {}), but no \
                    such migration is known to this linkboard binary. Did you downgrade?",
                id,
                actual.name,
                actual.applied_on,
            ))?;

            if actual.script != expected.script {
                debug!("Expected script for '{id}-{}':\n{}", expected.name, expected.script);
                debug!("Actual (in database) script for '{id}-{}':\n{}", actual.name, actual.script);

                bail!(
                    "The script of active migration '{}-{}' (applied on {}) does not match the \
                        expected script for that migration. This is unexpected.",
                    id,
                    actual.name,
                    actual.applied_on,
                );
            }
        }

        // `known` contains at least as many elements as `applied` at this point.
        match NonZeroU64::new(known.len() as u64 - applied.len() as u64) {
            None => Ok(Self::UpToDate),
            Some(new_migrations) => Ok(Self::Migrate { new_migrations }),
        }
    }

    /// Executes this plan on the database, bringing it into the state we expect.
    pub(crate) async fn execute(&self, tx: &Transaction<'_>) -> Result<()> {
        let new_migrations = match self {
            Self::UpToDate => {
                info!("All migrations are already applied: database schema is up to date.");
                return Ok(());
            }
            Self::EmptyDb => {
                info!("Database is empty. Creating table '__db_migrations'...");
                tx.batch_execute(include_str!("db-migrations.sql"))
                    .await
                    .context("could not create migrations meta table")?;
                MIGRATIONS.len() as u64
            }
            Self::Migrate { new_migrations } => new_migrations.get(),
        };

        info!("The database is missing {new_migrations} migrations. Applying them now.");
        for (id, migration) in MIGRATIONS.range(MIGRATIONS.len() as u64 - new_migrations + 1..) {
            debug!("Applying migration '{}-{}' ...", id, migration.name);
            trace!("Executing:\n{}", migration.script);

            tx.batch_execute(migration.script)
                .await
                .context(format!("failed to run script for '{}-{}'", id, migration.name))?;

            let query = "insert into __db_migrations (id, name, applied_on, script) \
                values ($1, $2, now(), $3)";
            tx.execute(query, &[&(*id as i64), &migration.name, &migration.script])
                .await
                .context("failed to update __db_migrations")?;
        }

        info!("Applied {new_migrations} migrations. DB is up to date now.");

        Ok(())
    }
}


/// Makes sure the database schema is up to date by checking the active
/// migrations and applying all missing ones.
///
/// If anything unexpected is noticed, an error is returned to notify the user
/// they have to manually deal with it.
pub(crate) async fn migrate(db: &mut DbConnection) -> Result<()> {
    // Everything runs in one serializable transaction, so only one instance
    // ever applies migrations. A commit can fail with a serialization error
    // if another instance did the same concurrently; we then retry and
    // expect to find the migrations already applied.
    loop {
        let tx = db.build_transaction()
            .isolation_level(IsolationLevel::Serializable)
            .start()
            .await?;

        let plan = MigrationPlan::build(&tx).await?;
        plan.execute(&tx).await?;

        match tx.commit().await {
            Ok(_) => return Ok(()),

            Err(e) if e.code() == Some(&SqlState::T_R_SERIALIZATION_FAILURE) => {
                let backoff_duration = Duration::from_millis(500);
                warn!(
                    "Database migration transaction failed to commit, likely because \
                        another linkboard instance ran it concurrently. \
                        Will try again in {backoff_duration:?}.",
                );

                tokio::time::sleep(backoff_duration).await;
                continue;
            }

            Err(e) => Err(e)?,
        }
    }
}

// Includes the scripts from the `migrations` folder and puts them into a map.
// Panics (on first use) if the IDs are not unique and consecutive.
macro_rules! include_migrations {
    ( $( $id:literal : $name:literal ,)+ ) => {
        Lazy::new(|| {
            let mut m = BTreeMap::new();
            $(
                let prev = m.insert($id, Migration {
                    name: $name,
                    script: include_str!(
                        concat!("migrations/", stringify!($id), "-", $name, ".sql")
                    ),
                });

                assert!(prev.is_none(), "duplicate key in `include_migrations!`");
            )+

            if !m.keys().copied().eq(1..m.len() as u64 + 1) {
                panic!("migration IDs in `include_migrations!` are not consecutive");
            }

            m
        })
    };
}

#[derive(Debug)]
struct Migration {
    name: &'static str,
    script: &'static str,
}

static MIGRATIONS: Lazy<BTreeMap<u64, Migration>> = include_migrations![
    01: "users",
    02: "links",
    03: "votes",
];


#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, num::NonZeroU64};
    use chrono::Utc;

    use super::{AppliedMigration, MigrationPlan, MIGRATIONS};

    fn applied(ids: impl IntoIterator<Item = u64>) -> BTreeMap<u64, AppliedMigration> {
        ids.into_iter()
            .map(|id| (id, AppliedMigration {
                name: MIGRATIONS[&id].name.into(),
                applied_on: Utc::now(),
                script: MIGRATIONS[&id].script.into(),
            }))
            .collect()
    }

    #[test]
    fn known_migrations_are_consecutive() {
        assert_eq!(MIGRATIONS.keys().copied().collect::<Vec<_>>(), [1, 2, 3]);
        assert!(MIGRATIONS[&3].script.contains("unique_vote_per_user_and_link"));
    }

    #[test]
    fn plan_from_applied_migrations() {
        assert_eq!(
            MigrationPlan::compare(&applied(1..=3), &MIGRATIONS).unwrap(),
            MigrationPlan::UpToDate,
        );
        assert_eq!(
            MigrationPlan::compare(&applied(1..=1), &MIGRATIONS).unwrap(),
            MigrationPlan::Migrate { new_migrations: NonZeroU64::new(2).unwrap() },
        );
    }

    #[test]
    fn modified_or_unknown_migrations_are_errors() {
        let mut modified = applied(1..=2);
        modified.get_mut(&2).unwrap().script.push_str("-- changed");
        assert!(MigrationPlan::compare(&modified, &MIGRATIONS).is_err());

        assert!(MigrationPlan::compare(&applied([1, 3]), &MIGRATIONS).is_err());

        let mut from_future = applied(1..=3);
        from_future.insert(4, AppliedMigration {
            name: "future".into(),
            applied_on: Utc::now(),
            script: String::new(),
        });
        assert!(MigrationPlan::compare(&from_future, &MIGRATIONS).is_err());
    }
}
