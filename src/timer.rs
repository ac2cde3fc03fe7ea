//! Temporizador con, como mucho, una tarea pendiente.

use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct TimerSlot {
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    /// Programa `action` tras `delay`, cancelando antes el temporizador previo.
    pub fn arm<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        }));
    }

    /// Devuelve `true` si había un temporizador pendiente.
    pub fn cancel(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_previous_timer() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::default();

        let first = fired.clone();
        slot.arm(Duration::from_millis(100), move || {
            first.fetch_add(1, Ordering::SeqCst);
        });
        let second = fired.clone();
        slot.arm(Duration::from_millis(100), move || {
            second.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
        assert!(!slot.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut slot = TimerSlot::default();
        let counter = fired.clone();
        slot.arm(Duration::from_millis(50), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.is_armed());
        assert!(slot.cancel());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!slot.cancel());
    }
}
