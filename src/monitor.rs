use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::calibrate;
use crate::cli::MonitorArgs;
use crate::config::SamplerConfig;
use crate::error::Error;
use crate::sampler::{Reader, Sampler};
use crate::source::{CpuinfoSource, FreqSource};
use crate::status::{FileSink, JitterCell, JitterState, StateSink};
use crate::tsc;

/// Owns the monitoring context: calibration happens once in [`Monitor::start`],
/// the sampling loop runs until [`Monitor::stop`], and the published state is
/// visible through [`Monitor::current`]. Separate instances do not interfere.
pub struct Monitor {
    config: SamplerConfig,
    cell: Arc<JitterCell>,
    sink: Arc<dyn StateSink>,
    sampler: Option<Sampler>,
    registered: bool,
}

impl Monitor {
    pub fn new(config: SamplerConfig, sink: Arc<dyn StateSink>) -> Self {
        Self {
            config,
            cell: Arc::new(JitterCell::new()),
            sink,
            sampler: None,
            registered: false,
        }
    }

    /// Calibrates from `source`, registers the endpoint and arms the
    /// sampling loop. Any failure leaves the monitor fully stopped: no
    /// endpoint registered, no firing scheduled.
    pub fn start(&mut self, source: &dyn FreqSource) -> Result<(), Error> {
        if !tsc::is_supported() {
            return Err(Error::Unsupported("RDTSCP not available on this CPU"));
        }
        self.start_inner(source, tsc::read)
    }

    fn start_inner(&mut self, source: &dyn FreqSource, reader: Reader) -> Result<(), Error> {
        if self.sampler.is_some() {
            return Ok(());
        }

        let text = source.read_text()?;
        let hz = calibrate::parse_frequency(&text)?;
        let cal = calibrate::compute_band(hz, self.config.period_ms, self.config.tolerance);
        log::info!(
            target: "tscmon::monitor",
            "calibrated: {} Hz, expected {} cycles per {} ms, band [{}, {}]",
            cal.nominal_hz, cal.expected_delta, self.config.period_ms, cal.band_low, cal.band_high,
        );

        self.sink.register()?;
        self.registered = true;

        let mut sampler =
            Sampler::new(cal, Arc::clone(&self.cell), Arc::clone(&self.sink), reader);
        if let Err(e) = sampler.arm(self.config.period_ms) {
            self.sink.unregister();
            self.registered = false;
            return Err(e);
        }
        self.sampler = Some(sampler);
        Ok(())
    }

    /// Disarms the loop and removes the endpoint. Safe to call at any point,
    /// including when `start` never ran or never succeeded; repeated calls
    /// are no-ops.
    pub fn stop(&mut self) {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.disarm();
        }
        if self.registered {
            self.sink.unregister();
            self.registered = false;
        }
    }

    /// Snapshot of the latest published state.
    pub fn current(&self) -> JitterState {
        self.cell.current()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = signal_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

pub fn run(args: &MonitorArgs, config: &SamplerConfig) -> Result<(), Error> {
    let sink: Arc<dyn StateSink> = Arc::new(FileSink::new(&args.status_file));
    let mut monitor = Monitor::new(config.clone(), sink);

    install_signal_handlers();

    monitor.start(&CpuinfoSource::new(&config.cpuinfo))?;

    log::info!(
        target: "tscmon::monitor",
        "started: period={}ms tolerance={} status={}",
        config.period_ms, config.tolerance, args.status_file.display(),
    );

    while !SHUTDOWN.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(250));
    }

    log::info!(
        target: "tscmon::monitor",
        "shutting down (last delta {})",
        monitor.current().last_delta,
    );
    monitor.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsc::{CycleSample, UnitId};
    use std::cell::Cell;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    const STEP: u64 = 1_000;

    thread_local! {
        static TICKS: Cell<u64> = Cell::new(0);
    }

    fn stepped_read() -> CycleSample {
        TICKS.with(|t| {
            let value = t.get();
            t.set(value + STEP);
            CycleSample {
                value,
                unit: UnitId { socket: 0, core: 0 },
            }
        })
    }

    struct TextSource(&'static str);

    impl FreqSource for TextSource {
        fn read_text(&self) -> Result<String, Error> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSource;

    impl FreqSource for FailingSource {
        fn read_text(&self) -> Result<String, Error> {
            Err(Error::Source("unreachable provider".into()))
        }
    }

    struct TestSink {
        registered: AtomicBool,
        updates: AtomicUsize,
    }

    impl TestSink {
        fn new() -> Self {
            Self {
                registered: AtomicBool::new(false),
                updates: AtomicUsize::new(0),
            }
        }
    }

    impl StateSink for TestSink {
        fn register(&self) -> Result<(), Error> {
            self.registered.store(true, Ordering::Relaxed);
            Ok(())
        }
        fn update(&self, _state: &JitterState) -> Result<(), Error> {
            self.updates.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn unregister(&self) {
            self.registered.store(false, Ordering::Relaxed);
        }
    }

    fn fast_config() -> SamplerConfig {
        SamplerConfig {
            period_ms: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_start_publishes_and_stop_unregisters() {
        let sink = Arc::new(TestSink::new());
        let mut monitor = Monitor::new(fast_config(), Arc::clone(&sink) as Arc<dyn StateSink>);

        monitor
            .start_inner(&TextSource("cpu MHz\t\t: 1000.000\n"), stepped_read)
            .unwrap();
        assert!(sink.registered.load(Ordering::Relaxed));

        // Wait for the first firing to complete.
        let deadline = Instant::now() + Duration::from_secs(1);
        while !monitor.current().initialized && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let state = monitor.current();
        assert!(state.initialized);
        assert_eq!(state.last_delta, STEP);

        // The sink sees the snapshot shortly after it is published.
        thread::sleep(Duration::from_millis(30));
        assert!(sink.updates.load(Ordering::Relaxed) >= 1);

        monitor.stop();
        assert!(!sink.registered.load(Ordering::Relaxed));
        // Idempotent.
        monitor.stop();
    }

    #[test]
    fn test_calibration_failure_leaves_no_partial_state() {
        let sink = Arc::new(TestSink::new());
        let mut monitor = Monitor::new(fast_config(), Arc::clone(&sink) as Arc<dyn StateSink>);

        let err = monitor
            .start_inner(&TextSource("processor: 0\nflags: fpu\n"), stepped_read)
            .unwrap_err();
        assert!(matches!(err, Error::FrequencyNotFound));
        assert!(!sink.registered.load(Ordering::Relaxed));
        assert!(!monitor.current().initialized);
    }

    #[test]
    fn test_zero_frequency_fails_startup() {
        let sink = Arc::new(TestSink::new());
        let mut monitor = Monitor::new(fast_config(), Arc::clone(&sink) as Arc<dyn StateSink>);

        let err = monitor
            .start_inner(&TextSource("cpu MHz : 0.000\n"), stepped_read)
            .unwrap_err();
        assert!(matches!(err, Error::ZeroFrequency));
        assert!(!sink.registered.load(Ordering::Relaxed));
    }

    #[test]
    fn test_source_failure_propagates_without_retry() {
        let sink = Arc::new(TestSink::new());
        let mut monitor = Monitor::new(fast_config(), Arc::clone(&sink) as Arc<dyn StateSink>);

        let err = monitor.start_inner(&FailingSource, stepped_read).unwrap_err();
        assert!(matches!(err, Error::Source(_)));
        assert!(!sink.registered.load(Ordering::Relaxed));
    }

    #[test]
    fn test_stop_before_start_is_harmless() {
        let sink = Arc::new(TestSink::new());
        let mut monitor = Monitor::new(fast_config(), Arc::clone(&sink) as Arc<dyn StateSink>);
        monitor.stop();
        monitor.stop();
        assert!(!monitor.current().initialized);
    }
}
