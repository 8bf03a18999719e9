//! Dedicated threads that own a device stream.
//!
//! Device streams are not `Send` on every platform, so each one is built,
//! played and dropped on a thread of its own. The owner only holds a stop
//! channel: stopping never blocks the caller, which may be an async task.

use std::sync::mpsc;
use std::thread;

use super::AudioError;

/// Handle to a thread holding a running stream.
///
/// Dropping the handle stops the stream.
#[derive(Debug)]
pub struct StreamThread {
    name: String,
    stop: Option<mpsc::Sender<()>>,
}

impl StreamThread {
    /// Spawn `name` and run `build` on it.
    ///
    /// Returns once `build` has finished. Its error is returned to the
    /// caller; on success the value it produced is kept alive on the thread
    /// until [`StreamThread::stop`].
    pub fn spawn<S, F>(name: &str, build: F) -> Result<Self, AudioError>
    where
        S: 'static,
        F: FnOnce() -> Result<S, AudioError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), AudioError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns on stop() or when the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::StreamError(format!("{}: {}", name, e)))?;

        ready_rx.recv().unwrap_or_else(|_| {
            Err(AudioError::StreamError(format!("{} thread exited", name)))
        })?;

        tracing::debug!("Stream thread {} running", name);
        Ok(Self {
            name: name.to_string(),
            stop: Some(stop_tx),
        })
    }

    /// Signal the thread to drop its stream. Returns immediately.
    pub fn stop(&mut self) {
        if self.stop.take().is_some() {
            tracing::debug!("Stream thread {} stopping", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn wait_for(flag: &AtomicBool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if flag.load(Ordering::SeqCst) {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn test_stop_returns_without_waiting_for_thread() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        // Non-Send guard, built on the stream thread
        let mut handle = StreamThread::spawn("test-stream", move || {
            Ok((DropFlag(flag), std::rc::Rc::new(())))
        })
        .unwrap();
        assert!(handle.is_running());
        assert!(!dropped.load(Ordering::SeqCst));

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!handle.is_running());
        assert!(wait_for(&dropped));

        // Second stop is a no-op
        handle.stop();
    }

    #[test]
    fn test_drop_stops_stream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();
        let handle = StreamThread::spawn("test-stream", move || Ok(DropFlag(flag))).unwrap();

        drop(handle);
        assert!(wait_for(&dropped));
    }

    #[test]
    fn test_build_error_is_returned() {
        let result = StreamThread::spawn::<(), _>("test-stream", || {
            Err(AudioError::PipelineRejected("no stream".to_string()))
        });
        assert!(matches!(result, Err(AudioError::PipelineRejected(msg)) if msg == "no stream"));
    }

    #[test]
    fn test_panicking_build_reports_exit() {
        let result = StreamThread::spawn::<(), _>("test-stream", || panic!("device gone"));
        assert!(matches!(result, Err(AudioError::StreamError(_))));
    }
}
