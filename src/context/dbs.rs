//! Database creation and deletion

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;

use super::{CommitOutcome, CommonTxContext, TxContext, TxState};
use crate::error::BcdbResult;
use crate::types::{paths, DbAdministrationTx, GetDbStatusQuery, GetDbStatusResponse};

/// Stages database creations and deletions for one transaction
pub struct DbsTxContext {
    pub(super) common: CommonTxContext,
    create_dbs: BTreeSet<String>,
    delete_dbs: BTreeSet<String>,
}

impl DbsTxContext {
    pub(crate) fn new(common: CommonTxContext) -> Self {
        DbsTxContext {
            common,
            create_dbs: BTreeSet::new(),
            delete_dbs: BTreeSet::new(),
        }
    }

    /// Stage the creation of a database. Staging the same name twice has no further effect.
    pub fn create_db(&mut self, name: &str) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.create_dbs.insert(name.to_string());
        Ok(())
    }

    /// Stage the deletion of a database. Staging the same name twice has no further effect.
    pub fn delete_db(&mut self, name: &str) -> BcdbResult<()> {
        self.common.ensure_open()?;
        self.delete_dbs.insert(name.to_string());
        Ok(())
    }

    /// Ask the server whether a database exists.
    ///
    /// Reflects committed state only, never what this context has staged.
    pub async fn exists(&self, name: &str) -> BcdbResult<bool> {
        let query = GetDbStatusQuery {
            user_id: self.common.user_id().to_string(),
            db_name: name.to_string(),
        };
        let response: GetDbStatusResponse = self.common.query(paths::db_status(name), &query).await?;
        debug!(db = name, exist = response.exist, "database status");
        Ok(response.exist)
    }

    fn clear(&mut self) {
        self.create_dbs.clear();
        self.delete_dbs.clear();
    }
}

#[async_trait]
impl TxContext for DbsTxContext {
    async fn commit(&mut self, sync: bool) -> BcdbResult<CommitOutcome> {
        let create_dbs = &self.create_dbs;
        let delete_dbs = &self.delete_dbs;

        let result = self
            .common
            .commit(paths::POST_DB_TX, sync, |user_id, tx_id| DbAdministrationTx {
                user_id: user_id.to_string(),
                tx_id: tx_id.to_string(),
                create_dbs: create_dbs.iter().cloned().collect(),
                delete_dbs: delete_dbs.iter().cloned().collect(),
            })
            .await;

        if self.common.state().is_spent() {
            self.clear();
        }
        result
    }

    fn abort(&mut self) -> BcdbResult<()> {
        self.common.abort()?;
        self.clear();
        Ok(())
    }

    fn state(&self) -> TxState {
        self.common.state()
    }
}
