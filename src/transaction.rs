//! Multi-statement transactions against the mutation API.

use std::marker::PhantomData;

use crate::entity::{validate_entity, TableEntity};
use crate::error::Result;
use crate::models::TransactionStatement;
use crate::writer::{call_failed, ensure_success};

/// Accumulates statements under a server-issued transaction id.
///
/// Created by
/// [`TableWriter::begin_transaction`](crate::TableWriter::begin_transaction).
/// Statements are buffered locally, shipped on
/// [`commit`](TransactionBuilder::commit) and applied server-side in one
/// step. Dropping the builder without committing abandons the transaction.
#[derive(Debug)]
pub struct TransactionBuilder<T> {
    http: reqwest::Client,
    base_url: String,
    table_name: String,
    transaction_id: String,
    statements: Vec<TransactionStatement>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: TableEntity> TransactionBuilder<T> {
    pub(crate) fn new(
        http: reqwest::Client,
        base_url: String,
        table_name: String,
        transaction_id: String,
    ) -> Self {
        Self {
            http,
            base_url,
            table_name,
            transaction_id,
            statements: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// The server-issued id of this transaction.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Queue an insert-or-replace of the given rows.
    ///
    /// Rows are validated locally; a malformed row fails the call before
    /// anything is queued or sent.
    pub fn insert_or_replace(&mut self, entities: &[T]) -> Result<&mut Self> {
        for entity in entities {
            validate_entity(entity)?;
        }
        let encoded = entities
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.statements.push(TransactionStatement::InsertOrReplace {
            table_name: self.table_name.clone(),
            entities: encoded,
        });
        Ok(self)
    }

    /// Queue deletion of rows of one partition by their row keys.
    pub fn delete_rows(&mut self, partition_key: &str, row_keys: Vec<String>) -> &mut Self {
        self.statements.push(TransactionStatement::DeleteRows {
            table_name: self.table_name.clone(),
            partition_key: partition_key.to_string(),
            row_keys,
        });
        self
    }

    /// Queue removal of entire partitions.
    pub fn clean_partitions(&mut self, partition_keys: Vec<String>) -> &mut Self {
        self.statements.push(TransactionStatement::CleanPartitions {
            table_name: self.table_name.clone(),
            partition_keys,
        });
        self
    }

    /// Ship the queued statements and apply them server-side.
    pub async fn commit(self) -> Result<()> {
        if !self.statements.is_empty() {
            let operation = "Transaction/Append";
            let response = self
                .http
                .post(format!("{}/{}", self.base_url, operation))
                .query(&[("transactionId", self.transaction_id.as_str())])
                .json(&self.statements)
                .send()
                .await
                .map_err(|e| call_failed(operation, e))?;
            ensure_success(operation, response).await?;
        }

        let operation = "Transaction/Commit";
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, operation))
            .query(&[("transactionId", self.transaction_id.as_str())])
            .send()
            .await
            .map_err(|e| call_failed(operation, e))?;
        ensure_success(operation, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableLinkError;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Row {
        partition_key: String,
        row_key: String,
    }

    impl TableEntity for Row {
        fn partition_key(&self) -> &str {
            &self.partition_key
        }

        fn row_key(&self) -> &str {
            &self.row_key
        }
    }

    fn builder() -> TransactionBuilder<Row> {
        TransactionBuilder::new(
            reqwest::Client::new(),
            "http://localhost:5123".to_string(),
            "prices".to_string(),
            "tx-1".to_string(),
        )
    }

    #[test]
    fn test_statements_accumulate_in_order() {
        let mut tx = builder();
        tx.insert_or_replace(&[Row {
            partition_key: "p1".to_string(),
            row_key: "r1".to_string(),
        }])
        .unwrap()
        .delete_rows("p1", vec!["r2".to_string()])
        .clean_partitions(vec!["p9".to_string()]);

        assert_eq!(tx.statements.len(), 3);
        assert!(matches!(
            tx.statements[0],
            TransactionStatement::InsertOrReplace { .. }
        ));
        assert!(matches!(
            tx.statements[2],
            TransactionStatement::CleanPartitions { .. }
        ));
        assert_eq!(tx.transaction_id(), "tx-1");
    }

    #[test]
    fn test_malformed_row_is_rejected_before_queueing() {
        let mut tx = builder();
        let err = tx
            .insert_or_replace(&[Row {
                partition_key: String::new(),
                row_key: "r1".to_string(),
            }])
            .unwrap_err();

        assert!(matches!(err, TableLinkError::InvalidEntity(_)));
        assert!(tx.statements.is_empty());
    }
}
