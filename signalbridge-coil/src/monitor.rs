//! Coil monitor: one polling thread per serial device.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::edge::{CoilSpan, EdgeDetector};
use crate::frame::{MAX_READ_COILS, ReadCoilsRequest};
use crate::link::{CoilLink, LinkOpener};

/// Receives rising edges from a running monitor.
///
/// Called on the polling thread; a slow handler delays the next poll.
pub trait RisingEdgeHandler: Send + 'static {
    fn on_rising_edge(&mut self, address: u16) -> anyhow::Result<()>;
}

impl<F> RisingEdgeHandler for F
where
    F: FnMut(u16) -> anyhow::Result<()> + Send + 'static,
{
    fn on_rising_edge(&mut self, address: u16) -> anyhow::Result<()> {
        self(address)
    }
}

/// Errors raised while setting up a monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("No coil addresses to watch")]
    NoAddresses,

    #[error("Coil span {quantity} exceeds the Read Coils limit of {max}")]
    SpanTooLarge { quantity: u16, max: u16 },

    #[error("Failed to spawn polling thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Previous polling thread has not exited yet")]
    StillStopping,
}

/// What a monitor polls and how often.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Name used for the thread and in logs.
    pub name: String,
    pub slave_id: u8,
    pub addresses: Vec<u16>,
    pub poll_interval: Duration,
    /// How long `stop()` waits for the polling thread.
    pub stop_timeout: Duration,
}

impl MonitorSettings {
    pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);
}

struct Running {
    stop_tx: mpsc::Sender<()>,
    done_rx: mpsc::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Watches coils on one device and reports rising edges.
///
/// Polling runs on a dedicated OS thread that owns the link and the per-address
/// state. Each restart begins from a fresh, unobserved state table.
pub struct CoilMonitor<O: LinkOpener> {
    settings: MonitorSettings,
    opener: Arc<O>,
    span: CoilSpan,
    running: Option<Running>,
    /// Thread that missed its stop timeout; it may still hold the port.
    detached: Option<JoinHandle<()>>,
}

impl<O: LinkOpener> CoilMonitor<O> {
    pub fn new(settings: MonitorSettings, opener: O) -> Result<Self, MonitorError> {
        let span = CoilSpan::covering(settings.addresses.iter().copied())
            .ok_or(MonitorError::NoAddresses)?;

        if span.quantity > MAX_READ_COILS {
            return Err(MonitorError::SpanTooLarge {
                quantity: span.quantity,
                max: MAX_READ_COILS,
            });
        }

        Ok(Self {
            settings,
            opener: Arc::new(opener),
            span,
            running: None,
            detached: None,
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Range requested every cycle.
    pub fn span(&self) -> CoilSpan {
        self.span
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Start polling in the background. Does nothing if already running.
    ///
    /// Fails with [`MonitorError::StillStopping`] while a thread detached by
    /// an earlier `stop()` is still alive.
    pub fn start<H: RisingEdgeHandler>(&mut self, handler: H) -> Result<(), MonitorError> {
        if self.is_running() {
            return Ok(());
        }
        if self.detached.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(MonitorError::StillStopping);
        }
        if let Some(previous) = self.detached.take() {
            let _ = previous.join();
        }
        // Reap a thread that exited on its own.
        if let Some(finished) = self.running.take() {
            let _ = finished.handle.join();
        }

        let detector = EdgeDetector::new(self.settings.addresses.iter().copied())
            .ok_or(MonitorError::NoAddresses)?;
        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let poll = PollLoop {
            name: self.settings.name.clone(),
            opener: Arc::clone(&self.opener),
            link: None,
            request: ReadCoilsRequest::new(
                self.settings.slave_id,
                self.span.start,
                self.span.quantity,
            ),
            detector,
            backoff: Backoff::reconnect(),
            poll_interval: self.settings.poll_interval,
            handler,
        };

        let handle = std::thread::Builder::new()
            .name(format!("coil-{}", self.settings.name))
            .spawn(move || {
                // Dropped on exit, including unwinds.
                let _done = done_tx;
                poll.run(stop_rx);
            })
            .map_err(MonitorError::Spawn)?;

        self.running = Some(Running {
            stop_tx,
            done_rx,
            handle,
        });

        Ok(())
    }

    /// Stop polling, waiting up to the configured stop timeout.
    ///
    /// A thread that does not finish in time is detached; it exits at its next
    /// stop check and closes its link there. Until then `start()` refuses to
    /// spawn a replacement.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.stop_tx.send(());

        match running.done_rx.recv_timeout(self.settings.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    device = %self.settings.name,
                    timeout = ?self.settings.stop_timeout,
                    "Polling thread did not stop in time, detaching"
                );
                self.detached = Some(running.handle);
            }
            _ => {
                if running.handle.join().is_err() {
                    error!(device = %self.settings.name, "Polling thread panicked");
                }
            }
        }
    }
}

impl<O: LinkOpener> Drop for CoilMonitor<O> {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollLoop<O: LinkOpener, H> {
    name: String,
    opener: Arc<O>,
    link: Option<O::Link>,
    request: ReadCoilsRequest,
    detector: EdgeDetector,
    backoff: Backoff,
    poll_interval: Duration,
    handler: H,
}

impl<O: LinkOpener, H: RisingEdgeHandler> PollLoop<O, H> {
    fn run(mut self, stop_rx: mpsc::Receiver<()>) {
        info!(
            device = %self.name,
            target = %self.opener.describe(),
            start = self.request.start,
            quantity = self.request.quantity,
            "Coil monitor started"
        );

        loop {
            let wait = self.cycle();
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.close_link();
        info!(device = %self.name, "Coil monitor stopped");
    }

    /// Run one poll cycle and return how long to wait before the next.
    fn cycle(&mut self) -> Duration {
        if self.link.is_none() {
            match self.opener.open() {
                Ok(link) => self.link = Some(link),
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(device = %self.name, error = %e, retry_in = ?delay, "Link open failed");
                    return delay;
                }
            }
        }

        let Some(link) = self.link.as_mut() else {
            return self.poll_interval;
        };

        let request = self.request.encode();
        let mut response = vec![0u8; self.request.response_len()];

        match link.exchange(&request, &mut response) {
            Ok(read) => {
                self.backoff.reset();
                match self.request.decode_response(&response[..read]) {
                    Ok(bits) => {
                        for address in self.detector.observe(&bits) {
                            self.fire(address);
                        }
                    }
                    Err(e) => debug!(device = %self.name, error = %e, "Discarding response"),
                }
                self.poll_interval
            }
            Err(e) => {
                self.close_link();
                let delay = self.backoff.next_delay();
                warn!(
                    device = %self.name,
                    error = %e,
                    retry_in = ?delay,
                    "Link failed, reconnecting"
                );
                delay
            }
        }
    }

    fn fire(&mut self, address: u16) {
        debug!(device = %self.name, address, "Rising edge");

        let handler = &mut self.handler;
        match panic::catch_unwind(AssertUnwindSafe(|| handler.on_rising_edge(address))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(device = %self.name, address, error = %e, "Rising edge handler failed");
            }
            Err(_) => {
                error!(device = %self.name, address, "Rising edge handler panicked");
            }
        }
    }

    fn close_link(&mut self) {
        if self.link.take().is_some() {
            info!(device = %self.name, "Link closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::frame::encode_response;
    use crate::link::LinkError;

    enum Step {
        Reply(Vec<u8>),
        Fail,
    }

    #[derive(Default)]
    struct Script {
        opens: VecDeque<bool>,
        steps: VecDeque<Step>,
        open_calls: usize,
    }

    #[derive(Clone, Default)]
    struct ScriptedOpener(Arc<Mutex<Script>>);

    struct ScriptedLink(Arc<Mutex<Script>>);

    impl LinkOpener for ScriptedOpener {
        type Link = ScriptedLink;

        fn open(&self) -> Result<ScriptedLink, LinkError> {
            let mut script = self.0.lock().unwrap();
            script.open_calls += 1;
            if script.opens.pop_front().unwrap_or(true) {
                Ok(ScriptedLink(self.0.clone()))
            } else {
                Err(LinkError::Open {
                    port: "fake".to_string(),
                    message: "busy".to_string(),
                })
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    impl CoilLink for ScriptedLink {
        fn exchange(&mut self, _request: &[u8], response: &mut [u8]) -> Result<usize, LinkError> {
            match self.0.lock().unwrap().steps.pop_front() {
                Some(Step::Reply(frame)) => {
                    let n = frame.len().min(response.len());
                    response[..n].copy_from_slice(&frame[..n]);
                    Ok(n)
                }
                Some(Step::Fail) => Err(LinkError::Io(std::io::Error::other("unplugged"))),
                None => Ok(0),
            }
        }
    }

    fn ignore(_address: u16) -> anyhow::Result<()> {
        Ok(())
    }

    fn poll_loop(
        opener: ScriptedOpener,
        addresses: &[u16],
        fired: Arc<Mutex<Vec<u16>>>,
    ) -> PollLoop<ScriptedOpener, impl RisingEdgeHandler> {
        let detector = EdgeDetector::new(addresses.iter().copied()).unwrap();
        let span = detector.span();
        PollLoop {
            name: "test".to_string(),
            opener: Arc::new(opener),
            link: None,
            request: ReadCoilsRequest::new(3, span.start, span.quantity),
            detector,
            backoff: Backoff::reconnect(),
            poll_interval: Duration::from_millis(10),
            handler: move |address: u16| -> anyhow::Result<()> {
                fired.lock().unwrap().push(address);
                Ok(())
            },
        }
    }

    #[test]
    fn test_new_rejects_empty_and_oversized() {
        let settings = |addresses: Vec<u16>| MonitorSettings {
            name: "dev".to_string(),
            slave_id: 3,
            addresses,
            poll_interval: Duration::from_millis(10),
            stop_timeout: MonitorSettings::DEFAULT_STOP_TIMEOUT,
        };

        assert!(matches!(
            CoilMonitor::new(settings(vec![]), ScriptedOpener::default()),
            Err(MonitorError::NoAddresses)
        ));
        assert!(matches!(
            CoilMonitor::new(settings(vec![0, 2000]), ScriptedOpener::default()),
            Err(MonitorError::SpanTooLarge { quantity: 2001, .. })
        ));

        let monitor = CoilMonitor::new(settings(vec![0, 1999]), ScriptedOpener::default()).unwrap();
        assert_eq!(monitor.span().quantity, 2000);
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_open_failures_back_off_then_reset() {
        let opener = ScriptedOpener::default();
        {
            let mut script = opener.0.lock().unwrap();
            script.opens.extend([false, false, false, true]);
            script.steps.push_back(Step::Reply(encode_response(3, &[false])));
        }
        let mut poll = poll_loop(opener.clone(), &[0], Arc::default());

        assert_eq!(poll.cycle(), Duration::from_millis(500));
        assert_eq!(poll.cycle(), Duration::from_millis(750));
        assert_eq!(poll.cycle(), Duration::from_micros(1_125_000));

        // Opens, reads successfully, polls at the normal rate.
        assert_eq!(poll.cycle(), Duration::from_millis(10));
        assert_eq!(poll.backoff.current(), Duration::from_millis(500));
        assert_eq!(opener.0.lock().unwrap().open_calls, 4);
    }

    #[test]
    fn test_transport_error_closes_link_and_reopens() {
        let opener = ScriptedOpener::default();
        {
            let mut script = opener.0.lock().unwrap();
            script.steps.push_back(Step::Fail);
            script.steps.push_back(Step::Reply(encode_response(3, &[true])));
        }
        let mut poll = poll_loop(opener.clone(), &[0], Arc::default());

        assert_eq!(poll.cycle(), Duration::from_millis(500));
        assert!(poll.link.is_none());

        assert_eq!(poll.cycle(), Duration::from_millis(10));
        assert!(poll.link.is_some());
        assert_eq!(opener.0.lock().unwrap().open_calls, 2);
    }

    #[test]
    fn test_bad_checksum_leaves_state_unchanged() {
        let opener = ScriptedOpener::default();
        let mut corrupted = encode_response(3, &[true]);
        corrupted[3] ^= 0x01;
        {
            let mut script = opener.0.lock().unwrap();
            script.steps.push_back(Step::Reply(encode_response(3, &[false])));
            script.steps.push_back(Step::Reply(corrupted));
        }
        let fired = Arc::new(Mutex::new(Vec::new()));
        let mut poll = poll_loop(opener, &[0], fired.clone());

        poll.cycle();
        let before = poll.detector.state(0).unwrap();
        assert_eq!(before.previous, Some(false));

        // Corrupted frame: keeps the link, fires nothing, state untouched.
        assert_eq!(poll.cycle(), Duration::from_millis(10));
        assert_eq!(poll.detector.state(0).unwrap(), before);
        assert!(poll.link.is_some());
        assert!(fired.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handler_errors_and_panics_are_contained() {
        let opener = ScriptedOpener::default();
        {
            let mut script = opener.0.lock().unwrap();
            for state in [false, true, false, true, false, true] {
                script.steps.push_back(Step::Reply(encode_response(3, &[state])));
            }
        }
        let detector = EdgeDetector::new([0]).unwrap();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut poll = PollLoop {
            name: "test".to_string(),
            opener: Arc::new(opener),
            link: None,
            request: ReadCoilsRequest::new(3, 0, 1),
            detector,
            backoff: Backoff::reconnect(),
            poll_interval: Duration::from_millis(10),
            handler: move |_address: u16| -> anyhow::Result<()> {
                let mut n = counter.lock().unwrap();
                *n += 1;
                match *n {
                    1 => anyhow::bail!("downstream rejected"),
                    2 => {
                        drop(n);
                        panic!("handler bug")
                    }
                    _ => Ok(()),
                }
            },
        };

        for _ in 0..6 {
            assert_eq!(poll.cycle(), Duration::from_millis(10));
        }
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[test]
    fn test_start_stop_thread() {
        let opener = ScriptedOpener::default();
        let settings = MonitorSettings {
            name: "dev".to_string(),
            slave_id: 3,
            addresses: vec![1],
            poll_interval: Duration::from_millis(5),
            stop_timeout: Duration::from_secs(2),
        };
        let mut monitor = CoilMonitor::new(settings, opener.clone()).unwrap();

        monitor.start(ignore).unwrap();
        assert!(monitor.is_running());
        // Second start is a no-op.
        monitor.start(ignore).unwrap();

        monitor.stop();
        assert!(!monitor.is_running());
        assert_eq!(opener.0.lock().unwrap().open_calls, 1);

        // Restart works after a stop.
        monitor.start(ignore).unwrap();
        assert!(monitor.is_running());
        monitor.stop();
    }

    #[test]
    fn test_no_restart_while_detached_thread_lives() {
        let opener = ScriptedOpener::default();
        {
            let mut script = opener.0.lock().unwrap();
            script.steps.push_back(Step::Reply(encode_response(3, &[false])));
            script.steps.push_back(Step::Reply(encode_response(3, &[true])));
        }
        let settings = MonitorSettings {
            name: "dev".to_string(),
            slave_id: 3,
            addresses: vec![1],
            poll_interval: Duration::from_millis(5),
            stop_timeout: Duration::from_millis(50),
        };
        let mut monitor = CoilMonitor::new(settings, opener.clone()).unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        monitor
            .start(move |_address: u16| -> anyhow::Result<()> {
                let _ = entered_tx.send(());
                let _ = release_rx.recv();
                Ok(())
            })
            .unwrap();

        // Handler is now blocking the polling thread.
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        monitor.stop();
        assert!(!monitor.is_running());

        assert!(matches!(monitor.start(ignore), Err(MonitorError::StillStopping)));
        assert_eq!(opener.0.lock().unwrap().open_calls, 1);

        release_tx.send(()).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            match monitor.start(ignore) {
                Ok(()) => break,
                Err(MonitorError::StillStopping) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => panic!("restart failed: {e}"),
            }
        }
        assert!(monitor.is_running());
        monitor.stop();
        assert_eq!(opener.0.lock().unwrap().open_calls, 2);
    }
}
