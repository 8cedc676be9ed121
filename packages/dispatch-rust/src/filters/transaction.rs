use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dispatch::context::{ExecutedContext, HandlerContext};
use crate::dispatch::error::DispatchError;
use crate::dispatch::filter::{Filter, HandlerFilter};

const TRANSACTION_KEY: &str = "conduit.transaction";

/// A unit of work opened around one handler attempt.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self, context: &HandlerContext) -> anyhow::Result<Box<dyn Transaction>>;
}

/// Begins a transaction in the pre-phase; commits on success, rolls back on
/// failure. Under a retry policy every attempt gets its own transaction.
///
/// A failed commit becomes the dispatch failure. A failed rollback is logged
/// and the original failure is kept.
pub struct TransactionFilter {
    manager: Arc<dyn TransactionManager>,
}

impl TransactionFilter {
    #[must_use]
    pub fn new(manager: Arc<dyn TransactionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl HandlerFilter for TransactionFilter {
    async fn on_executing(&self, context: &mut HandlerContext) -> Result<(), DispatchError> {
        let transaction = self
            .manager
            .begin(context)
            .await
            .map_err(|e| DispatchError::filter(std::any::type_name::<Self>(), e))?;
        context.items_mut().insert(TRANSACTION_KEY, transaction);
        Ok(())
    }

    async fn on_executed(&self, executed: &mut ExecutedContext) -> Result<(), DispatchError> {
        let Some(transaction) = executed
            .context_mut()
            .items_mut()
            .remove::<Box<dyn Transaction>>(TRANSACTION_KEY)
        else {
            return Ok(());
        };

        if executed.is_success() {
            transaction
                .commit()
                .await
                .map_err(|e| DispatchError::filter(std::any::type_name::<Self>(), e.context("commit failed")))?;
            debug!("transaction committed");
        } else if let Err(error) = transaction.rollback().await {
            warn!(error = %format!("{error:#}"), "transaction rollback failed");
        } else {
            debug!("transaction rolled back");
        }
        Ok(())
    }
}

impl Filter for TransactionFilter {
    fn allow_multiple(&self) -> bool {
        false
    }

    fn as_handler_filter(&self) -> Option<&dyn HandlerFilter> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use parking_lot::Mutex;

    use super::*;
    use crate::dispatch::middleware::RetryPolicy;
    use crate::dispatch::testing::{echo, failing, mediator_with, scripted, Echo};

    #[derive(Default)]
    struct Journal {
        entries: Mutex<Vec<String>>,
        refuse_commit: bool,
    }

    impl Journal {
        fn entries(&self) -> Vec<String> {
            self.entries.lock().clone()
        }
    }

    struct JournalTransaction {
        id: usize,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl Transaction for JournalTransaction {
        async fn commit(self: Box<Self>) -> anyhow::Result<()> {
            if self.journal.refuse_commit {
                return Err(anyhow!("serialization failure"));
            }
            self.journal.entries.lock().push(format!("commit {}", self.id));
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
            self.journal.entries.lock().push(format!("rollback {}", self.id));
            Ok(())
        }
    }

    #[async_trait]
    impl TransactionManager for Arc<Journal> {
        async fn begin(&self, _context: &HandlerContext) -> anyhow::Result<Box<dyn Transaction>> {
            let mut entries = self.entries.lock();
            let id = entries.len();
            entries.push(format!("begin {id}"));
            Ok(Box::new(JournalTransaction {
                id,
                journal: Arc::clone(self),
            }))
        }
    }

    fn filter(journal: &Arc<Journal>) -> TransactionFilter {
        TransactionFilter::new(Arc::new(Arc::clone(journal)))
    }

    #[tokio::test]
    async fn success_commits() {
        let journal = Arc::new(Journal::default());
        let (registration, _) = echo();
        let mediator = mediator_with(registration.filter(filter(&journal)).unwrap(), |b| b);

        mediator.send(Echo("a")).await.unwrap();
        assert_eq!(journal.entries(), vec!["begin 0", "commit 0"]);
    }

    #[tokio::test]
    async fn failure_rolls_back() {
        let journal = Arc::new(Journal::default());
        let (registration, _) = failing("boom");
        let mediator = mediator_with(registration.filter(filter(&journal)).unwrap(), |b| b);

        assert!(mediator.send(Echo("a")).await.is_err());
        assert_eq!(journal.entries(), vec!["begin 0", "rollback 0"]);
    }

    #[tokio::test]
    async fn each_attempt_gets_its_own_transaction() {
        let journal = Arc::new(Journal::default());
        let (registration, _) = scripted(|command, call| {
            if call == 1 {
                Err(anyhow!("deadlock"))
            } else {
                Ok(command.0.to_string())
            }
        });
        let registration = registration
            .retry(RetryPolicy::on_any_failure(2))
            .filter(filter(&journal))
            .unwrap();
        let mediator = mediator_with(registration, |b| b);

        mediator.send(Echo("a")).await.unwrap();
        assert_eq!(
            journal.entries(),
            vec!["begin 0", "rollback 0", "begin 2", "commit 2"]
        );
    }

    #[tokio::test]
    async fn failed_commit_fails_the_dispatch() {
        let journal = Arc::new(Journal {
            refuse_commit: true,
            ..Journal::default()
        });
        let (registration, _) = echo();
        let mediator = mediator_with(registration.filter(filter(&journal)).unwrap(), |b| b);

        let err = mediator.send(Echo("a")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Filter { .. }));
        assert!(format!("{:#}", err.cause().unwrap()).contains("serialization failure"));
    }
}
