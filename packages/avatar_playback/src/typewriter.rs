//! Timed character-by-character reveal of reply text.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// At most one reveal runs at a time; starting a new one stops the old one.
#[derive(Default)]
pub struct Typewriter {
    current: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Typewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reveal `text` one character per `delay`. `on_done` runs only when the
    /// whole text was revealed, never after [`Typewriter::stop`].
    pub fn start<C, D>(&mut self, text: String, delay: Duration, mut on_char: C, on_done: D)
    where
        C: FnMut(char) + Send + 'static,
        D: FnOnce() + Send + 'static,
    {
        self.stop();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            for ch in text.chars() {
                if token.is_cancelled() {
                    return;
                }
                on_char(ch);
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if !token.is_cancelled() {
                on_done();
            }
        });
        self.current = Some((cancel, handle));
    }

    /// Stop the running reveal, if any. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some((cancel, handle)) = self.current.take() {
            trace!("stopping text reveal");
            cancel.cancel();
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }
}

impl Drop for Typewriter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    fn collector() -> (Arc<Mutex<String>>, impl FnMut(char) + Send + 'static) {
        let out = Arc::new(Mutex::new(String::new()));
        let sink = out.clone();
        (out, move |c| sink.lock().unwrap().push(c))
    }

    #[tokio::test(start_paused = true)]
    async fn reveals_whole_text_then_completes() {
        let mut tw = Typewriter::new();
        let (out, on_char) = collector();
        let (done_tx, done_rx) = oneshot::channel();
        tw.start("你好!".into(), Duration::from_millis(100), on_char, move || {
            let _ = done_tx.send(());
        });

        done_rx.await.unwrap();
        assert_eq!(out.lock().unwrap().as_str(), "你好!");
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_is_paced_by_delay() {
        let mut tw = Typewriter::new();
        let (out, on_char) = collector();
        tw.start("abcd".into(), Duration::from_millis(100), on_char, || {});

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(out.lock().unwrap().as_str(), "ab");
        tw.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_completion() {
        let mut tw = Typewriter::new();
        let (out, on_char) = collector();
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        tw.start("abcdef".into(), Duration::from_millis(100), on_char, move || {
            let _ = done_tx.send(());
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tw.stop();
        tw.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(out.lock().unwrap().as_str(), "a");
        assert!(done_rx.try_recv().is_err());
        assert!(!tw.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_reveal() {
        let mut tw = Typewriter::new();
        let (out, on_char) = collector();
        tw.start("xxxx".into(), Duration::from_millis(100), on_char, || {});
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (out2, on_char2) = collector();
        let (done_tx, done_rx) = oneshot::channel();
        tw.start("yy".into(), Duration::from_millis(100), on_char2, move || {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(out.lock().unwrap().as_str(), "x");
        assert_eq!(out2.lock().unwrap().as_str(), "yy");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_text_completes_immediately() {
        let mut tw = Typewriter::new();
        let (done_tx, done_rx) = oneshot::channel();
        tw.start(String::new(), Duration::from_millis(100), |_| {}, move || {
            let _ = done_tx.send(());
        });
        done_rx.await.unwrap();
    }
}
