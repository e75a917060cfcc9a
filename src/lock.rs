use sea_orm::{
    ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbBackend, Statement,
    TransactionTrait, Value,
};
use tracing::{debug, warn};

use crate::config::AdvisoryLockStrategy;
use crate::error::ClosurePlanError;

/// Transaction that holds the closure table's advisory lock until commit or rollback.
pub struct LockedTransaction {
    txn: Option<DatabaseTransaction>,
    key: Option<String>,
}

impl LockedTransaction {
    pub async fn acquire(
        strategy: &AdvisoryLockStrategy,
        db: &DatabaseConnection,
    ) -> Result<Self, ClosurePlanError> {
        let key = strategy.key().map(|key| key.as_str().to_owned());

        let txn = db.begin().await.map_err(ClosurePlanError::from_db)?;

        if let Some(ref key) = key {
            if let Err(err) = acquire_lock(&txn, key).await {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "rollback after failed lock acquisition failed");
                }
                return Err(err);
            }
            debug!(key = %key, "advisory lock acquired");
        }

        Ok(Self {
            txn: Some(txn),
            key,
        })
    }

    pub fn connection(&self) -> Result<&DatabaseTransaction, ClosurePlanError> {
        self.txn
            .as_ref()
            .ok_or_else(|| ClosurePlanError::inconsistent("transaction already consumed"))
    }

    pub async fn commit(mut self) -> Result<(), ClosurePlanError> {
        if let Some(ref key) = self.key {
            if let Some(txn) = self.txn.as_ref() {
                release_lock(txn, key).await?;
            }
        }

        if let Some(txn) = self.txn.take() {
            txn.commit().await.map_err(ClosurePlanError::from_db)?;
        }

        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), ClosurePlanError> {
        if let Some(ref key) = self.key {
            if let Some(txn) = self.txn.as_ref() {
                if let Err(err) = release_lock(txn, key).await {
                    warn!(error = %err, key = %key, "advisory unlock failed during rollback");
                }
            }
        }

        if let Some(txn) = self.txn.take() {
            txn.rollback().await.map_err(ClosurePlanError::from_db)?;
        }

        Ok(())
    }
}

async fn acquire_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), ClosurePlanError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_lock(hashtext($1), 0)",
        vec![Value::from(key)],
    ))
    .await
    .map_err(ClosurePlanError::from_db)?;
    Ok(())
}

async fn release_lock(txn: &DatabaseTransaction, key: &str) -> Result<(), ClosurePlanError> {
    txn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT pg_advisory_unlock(hashtext($1), 0)",
        vec![Value::from(key)],
    ))
    .await
    .map_err(ClosurePlanError::from_db)?;
    Ok(())
}
