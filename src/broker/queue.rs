use crate::broker::topic::SubscriberId;

/// A point-to-point destination. Consumers are served round robin; the
/// messages themselves live in persistence until acknowledged.
///
/// The first durable identity to subscribe becomes the owner. From then on
/// only sessions carrying that identity may consume.
#[derive(Debug, Default)]
pub struct Queue {
    pub name: String,
    pub consumers: Vec<SubscriberId>,
    pub owner: Option<String>,
    next: usize,
}

impl Queue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            consumers: Vec::new(),
            owner: None,
            next: 0,
        }
    }

    pub fn subscribe(&mut self, id: SubscriberId) {
        if !self.consumers.contains(&id) {
            self.consumers.push(id);
        }
    }

    pub fn unsubscribe(&mut self, id: &SubscriberId) {
        self.consumers.retain(|c| c != id);
    }

    /// Binds the queue to `owner` and detaches the anonymous consumers that
    /// were attached before, returning them.
    pub fn claim(&mut self, owner: String) -> Vec<SubscriberId> {
        self.owner = Some(owner);
        self.next = 0;
        std::mem::take(&mut self.consumers)
    }

    pub fn has_consumers(&self) -> bool {
        !self.consumers.is_empty()
    }

    /// Picks the consumer for the next delivery, or `None` when nobody listens.
    pub fn next_consumer(&mut self) -> Option<SubscriberId> {
        if self.consumers.is_empty() {
            return None;
        }
        let idx = self.next % self.consumers.len();
        self.next = self.next.wrapping_add(1);
        Some(self.consumers[idx].clone())
    }
}
