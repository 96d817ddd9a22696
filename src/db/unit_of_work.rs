use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::audit::{EventBus, Outbox};

/// A database transaction paired with the audit events it produced.
///
/// Staged events reach the event bus only after the transaction commits.
/// Rolling back, failing to commit, or dropping the unit of work discards
/// them.
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
    outbox: Outbox,
}

impl UnitOfWork {
    pub async fn begin(pool: &PgPool) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx: pool.begin().await?,
            outbox: Outbox::new(),
        })
    }

    /// Borrow the connection and the outbox at the same time.
    pub fn parts(&mut self) -> (&mut PgConnection, &mut Outbox) {
        (&mut *self.tx, &mut self.outbox)
    }

    /// Commit, then publish staged events. Returns how many were published.
    pub async fn commit(self, bus: &EventBus) -> Result<usize, sqlx::Error> {
        let UnitOfWork { tx, outbox } = self;
        tx.commit().await?;
        Ok(outbox.flush(bus).await)
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        let UnitOfWork { tx, outbox } = self;
        outbox.discard();
        tx.rollback().await
    }
}
