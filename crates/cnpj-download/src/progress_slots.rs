//! Small async-safe pool of integer "bar positions" handed to each running
//! download task so the progress TUI never shows two bars on the same row.
//!
//! Grounded on `CNPJDownloadManager.start_download_queue`'s
//! `PriorityQueue` of free positions in the original; modeled here as a
//! bounded MPMC channel pre-seeded with `1..=capacity`, which gives the same
//! "acquire lowest free slot, release on drop" behavior without a mutex.

use tokio::sync::mpsc;

pub struct ProgressSlots {
    tx: mpsc::Sender<u32>,
    rx: tokio::sync::Mutex<mpsc::Receiver<u32>>,
}

/// A held slot; returned to the pool when dropped.
pub struct Slot {
    position: u32,
    tx: mpsc::Sender<u32>,
}

impl Slot {
    pub fn position(&self) -> u32 {
        self.position
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        let _ = self.tx.try_send(self.position);
    }
}

impl ProgressSlots {
    pub fn new(capacity: u32) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1) as usize);
        for pos in 1..=capacity.max(1) {
            let _ = tx.try_send(pos);
        }
        Self { tx, rx: tokio::sync::Mutex::new(rx) }
    }

    /// Waits for a free slot. Released automatically when the returned
    /// [`Slot`] is dropped.
    pub async fn acquire(&self) -> Slot {
        let position = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .expect("a sender is always held by self.tx");
        Slot { position, tx: self.tx.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slots_never_exceed_capacity_and_are_reused() {
        let slots = ProgressSlots::new(2);
        let a = slots.acquire().await;
        let b = slots.acquire().await;
        assert_ne!(a.position(), b.position());

        drop(a);
        let c = slots.acquire().await; // should not deadlock: a's slot freed
        assert!(c.position() == 1 || c.position() == 2);
    }
}
