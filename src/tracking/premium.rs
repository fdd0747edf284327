use std::sync::Arc;

use tokio::sync::watch;

/// Premium-status collaborator.
///
/// Whoever owns the subscription state pushes changes through [`set`];
/// the session watches for `false -> true` transitions.
///
/// [`set`]: PremiumStatus::set
#[derive(Debug, Clone)]
pub struct PremiumStatus {
    tx: Arc<watch::Sender<bool>>,
}

impl PremiumStatus {
    pub fn new(is_premium: bool) -> Self {
        let (tx, _rx) = watch::channel(is_premium);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_premium(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns true if the value changed.
    pub fn set(&self, is_premium: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == is_premium {
                false
            } else {
                *current = is_premium;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for PremiumStatus {
    fn default() -> Self {
        Self::new(false)
    }
}
