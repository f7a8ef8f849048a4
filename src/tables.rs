//! Table lifecycle management
//!
//! Truncation of staging and target tables so repeated runs start from the
//! same state. Each call is one statement in its own transaction.

use tracing::{info, warn};

use crate::config::TablesSection;
use crate::database::{DatabaseBackend, DatabaseResult, TableTarget};

/// `TRUNCATE` statement for `tables`
///
/// Target tables are re-derived on every run, so their truncation cascades to
/// dependent rows and restarts identity sequences.
pub fn truncate_sql(tables: &[&TableTarget], reset_identity: bool) -> String {
    let names: Vec<String> = tables.iter().map(|t| t.qualified()).collect();
    if reset_identity {
        format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", names.join(", "))
    } else {
        format!("TRUNCATE TABLE {}", names.join(", "))
    }
}

/// Truncate the target tables, restarting identities and cascading
pub async fn truncate_targets<D>(db: &mut D, tables: &TablesSection) -> DatabaseResult<()>
where
    D: DatabaseBackend + ?Sized,
{
    let targets = [&tables.purchases_target, &tables.users_target];
    truncate(db, &truncate_sql(&targets, true)).await?;
    info!(
        tables = %format!("{}, {}", tables.purchases_target, tables.users_target),
        "Target tables truncated"
    );
    Ok(())
}

/// Truncate the staging tables
pub async fn truncate_staging<D>(db: &mut D, tables: &TablesSection) -> DatabaseResult<()>
where
    D: DatabaseBackend + ?Sized,
{
    let staging = [&tables.users_staging, &tables.purchases_staging];
    truncate(db, &truncate_sql(&staging, false)).await?;
    info!(
        tables = %format!("{}, {}", tables.users_staging, tables.purchases_staging),
        "Staging tables truncated"
    );
    Ok(())
}

/// Truncate targets, then staging
pub async fn truncate_all<D>(db: &mut D, tables: &TablesSection) -> DatabaseResult<()>
where
    D: DatabaseBackend + ?Sized,
{
    truncate_targets(db, tables).await?;
    truncate_staging(db, tables).await
}

async fn truncate<D>(db: &mut D, sql: &str) -> DatabaseResult<()>
where
    D: DatabaseBackend + ?Sized,
{
    db.begin().await?;
    if let Err(e) = db.execute(sql).await {
        if let Err(rollback) = db.rollback().await {
            warn!(error = %rollback, "Rollback after failed truncate also failed");
        }
        return Err(e);
    }
    db.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_sql() {
        let tables = TablesSection::default();
        assert_eq!(
            truncate_sql(&[&tables.purchases_target, &tables.users_target], true),
            "TRUNCATE TABLE \"public\".\"purchases\", \"public\".\"users\" RESTART IDENTITY CASCADE"
        );
        assert_eq!(
            truncate_sql(&[&tables.users_staging, &tables.purchases_staging], false),
            "TRUNCATE TABLE \"raw\".\"users_raw\", \"raw\".\"purchases_raw\""
        );
    }
}
