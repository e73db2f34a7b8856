//! Single-settlement completion cell.
//!
//! A [`Settle`] starts empty and accepts exactly one value. Later attempts to
//! settle it are ignored and reported back as `false`. Any number of waiters can
//! subscribe before or after settlement; all of them observe the first value.

use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct Settle<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone + Send + Sync + 'static> Settle<T> {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Store `value` unless the cell is already settled. Returns true if this call won.
    pub(crate) fn settle(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Future resolving to the settled value. Yields `None` if the cell is
    /// dropped without ever being settled.
    pub(crate) fn wait(&self) -> impl std::future::Future<Output = Option<T>> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let settled = rx.wait_for(|slot| slot.is_some()).await.ok()?;
            settled.clone()
        }
    }
}
