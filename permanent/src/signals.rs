use anyhow::Result;
use tokio::sync::RwLock;

use crate::value::Row;

#[derive(Debug)]
pub struct RestoreEvent<'a> {
    /// Label of the restored model.
    pub model: &'a str,
    pub instance: &'a Row,
}

pub type Handler = Box<dyn Fn(&RestoreEvent) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct Signal(RwLock<Vec<Handler>>);

impl Signal {
    pub async fn connect<F>(&self, f: F)
    where
        F: Fn(&RestoreEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.0.write().await.push(Box::new(f));
    }

    /// Calls every handler in registration order; stops at the first error.
    pub async fn send(&self, model: &str, instance: &Row) -> Result<usize> {
        let event = RestoreEvent { model, instance };
        let handlers = self.0.read().await;
        for f in handlers.iter() {
            f(&event)?;
        }
        Ok(handlers.len())
    }

    pub async fn receivers(&self) -> usize {
        self.0.read().await.len()
    }

    pub async fn disconnect_all(&self) {
        self.0.write().await.clear();
    }
}

#[derive(Default)]
pub struct Signals {
    pub pre_restore: Signal,
    pub post_restore: Signal,
}

impl Signals {
    pub fn new() -> Signals {
        Signals::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test() -> Result<()> {
        let signals = Signals::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        signals
            .pre_restore
            .connect(move |event| {
                assert_eq!(event.model, "books");
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        let row = Row::new();
        assert_eq!(signals.pre_restore.send("books", &row).await?, 1);
        assert_eq!(signals.post_restore.send("books", &row).await?, 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        signals
            .pre_restore
            .connect(|_| anyhow::bail!("rejected"))
            .await;
        assert!(signals.pre_restore.send("books", &row).await.is_err());
        assert_eq!(signals.pre_restore.receivers().await, 2);
        signals.pre_restore.disconnect_all().await;
        assert_eq!(signals.pre_restore.send("books", &row).await?, 0);
        Ok(())
    }
}
