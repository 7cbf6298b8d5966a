use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

/// Quiet period a local typing burst must observe before its latest value
/// is forwarded to the synchronizer.
pub const DEBOUNCE_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Collapses a burst of local edits into a single trailing value.
///
/// Every `push` resets the quiet-period timer; once the burst goes quiet
/// the most recent value is forwarded on the output channel. Intermediate
/// values are discarded, matching the whole-document replace contract of
/// the synchronizer.
pub struct Debouncer<T> {
    input: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(quiet: Duration, output: mpsc::UnboundedSender<T>) -> Self {
        let (input, mut rx) = mpsc::unbounded_channel::<T>();
        tokio::spawn(async move {
            while let Some(first) = rx.recv().await {
                let mut latest = first;
                loop {
                    tokio::select! {
                        next = rx.recv() => match next {
                            Some(value) => latest = value,
                            None => {
                                let _ = output.send(latest);
                                return;
                            }
                        },
                        _ = sleep(quiet) => {
                            if output.send(latest).is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }
            }
        });
        Self { input }
    }

    /// Record a new local value, restarting the quiet-period timer.
    pub fn push(&self, value: T) {
        let _ = self.input.send(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_trailing_value() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(DEBOUNCE_QUIET_PERIOD, out_tx);

        debouncer.push("a");
        debouncer.push("ab");
        debouncer.push("abc");
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(out_rx.try_recv().unwrap(), "abc");
        assert!(out_rx.try_recv().is_err(), "burst must yield one value");
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_push_resets_the_timer() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(DEBOUNCE_QUIET_PERIOD, out_tx);

        debouncer.push("first");
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.push("second");
        tokio::time::sleep(Duration::from_millis(300)).await;

        // 600ms since the first push, but only 300ms of quiet
        assert!(out_rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(out_rx.try_recv().unwrap(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_each_fire() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(DEBOUNCE_QUIET_PERIOD, out_tx);

        debouncer.push(1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        debouncer.push(2);
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(out_rx.try_recv().unwrap(), 1);
        assert_eq!(out_rx.try_recv().unwrap(), 2);
    }
}
