use super::bus::EventBus;
use super::event::AuditEvent;

/// Audit events staged by one unit of work.
///
/// Events leave the outbox only through [`Outbox::flush`], which callers
/// invoke after their transaction has committed. Dropping a non-empty outbox
/// discards its events.
#[derive(Debug, Default)]
pub struct Outbox {
    staged: Vec<AuditEvent>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&mut self, event: AuditEvent) {
        self.staged.push(event);
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.staged
    }

    pub fn len(&self) -> usize {
        self.staged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Publish every staged event. Returns how many were published.
    pub async fn flush(mut self, bus: &EventBus) -> usize {
        let events = std::mem::take(&mut self.staged);
        let count = events.len();
        for event in events {
            bus.publish(event).await;
        }
        count
    }

    pub fn discard(mut self) {
        let dropped = std::mem::take(&mut self.staged);
        if !dropped.is_empty() {
            tracing::debug!("Discarded {} staged audit event(s)", dropped.len());
        }
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            tracing::debug!(
                "Discarded {} staged audit event(s) without commit",
                self.staged.len()
            );
        }
    }
}
