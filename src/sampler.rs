use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::calibrate::Calibration;
use crate::error::Error;
use crate::status::{JitterCell, StateSink};
use crate::tsc::{CycleSample, UnitId};

/// Emitted when a firing's observed delta falls outside the acceptance band.
#[derive(Debug, Clone, Copy)]
pub struct JitterReport {
    pub delta: u64,
    pub start_unit: UnitId,
    pub end_unit: UnitId,
}

/// Produces one cycle sample. A plain function pointer so tests can drive
/// the loop with a synthetic counter through the same code path.
pub type Reader = fn() -> CycleSample;

/// True when `delta` falls outside the calibrated acceptance band. The band
/// is inclusive: a delta equal to either edge is in band.
pub fn out_of_band(delta: u64, cal: &Calibration) -> bool {
    delta < cal.band_low || delta > cal.band_high
}

/// Spins for `period` of wall-clock time. The wait is the sampling window
/// itself, so it must not yield: a sleeping thread would fold scheduler
/// latency into the measured delta.
fn busy_wait(period: Duration) {
    let start = Instant::now();
    while start.elapsed() < period {
        std::hint::spin_loop();
    }
}

/// One firing: two counter reads bracketing a busy-wait of one period.
///
/// The subtraction wraps; a 64-bit counter cannot plausibly wrap within one
/// window, which is an assumption about the counter width rather than a
/// guarantee. An out-of-band delta is reported, then the delta is published
/// unconditionally.
pub fn fire(
    cal: &Calibration,
    period: Duration,
    read: Reader,
    cell: &JitterCell,
    report: &mut dyn FnMut(JitterReport),
) -> u64 {
    let start = read();
    busy_wait(period);
    let end = read();
    let delta = end.value.wrapping_sub(start.value);
    if out_of_band(delta, cal) {
        report(JitterReport {
            delta,
            start_unit: start.unit,
            end_unit: end.unit,
        });
    }
    cell.publish(delta);
    delta
}

/// Logs an out-of-band firing to the observability channel.
pub fn log_report(r: &JitterReport) {
    log::warn!(
        target: "tscmon::sampler",
        "TSC jitter detected: {} ({} to {})",
        r.delta, r.start_unit, r.end_unit,
    );
}

/// Sleeps for `total`, checking the stop flag between short naps.
/// Returns true when the stop flag was raised.
fn interruptible_sleep(total: Duration, stop: &AtomicBool) -> bool {
    let step = Duration::from_millis(10);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        let s = remaining.min(step);
        thread::sleep(s);
        remaining = remaining.saturating_sub(s);
    }
    stop.load(Ordering::Relaxed)
}

/// Drives firings on one dedicated worker thread: idle until [`Sampler::arm`],
/// then self-rearming every period until [`Sampler::disarm`]. A single
/// worker runs all firings, so consecutive firings never overlap and every
/// end-read precedes the next firing's start-read.
pub struct Sampler {
    cal: Calibration,
    reader: Reader,
    cell: Arc<JitterCell>,
    sink: Arc<dyn StateSink>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Sampler {
    /// The production reader is [`crate::tsc::read`]; tests pass a synthetic one.
    pub fn new(
        cal: Calibration,
        cell: Arc<JitterCell>,
        sink: Arc<dyn StateSink>,
        reader: Reader,
    ) -> Self {
        Self {
            cal,
            reader,
            cell,
            sink,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Idle → Armed: schedules the first firing one period from now.
    /// A no-op when already armed.
    pub fn arm(&mut self, period_ms: u64) -> Result<(), Error> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::Relaxed);

        let cal = self.cal;
        let reader = self.reader;
        let period = Duration::from_millis(period_ms);
        let cell = Arc::clone(&self.cell);
        let sink = Arc::clone(&self.sink);
        let stop = Arc::clone(&self.stop);

        let handle = thread::Builder::new()
            .name("tscmon-sampler".into())
            .spawn(move || {
                // Each firing is followed by a full period of idle sleep:
                // the next firing is scheduled relative to when the previous
                // one finished, not on a fixed wall-clock grid. Overruns
                // accumulate, and the full sampling window always wins over
                // grid alignment.
                while !interruptible_sleep(period, &stop) {
                    let delta = fire(&cal, period, reader, &cell, &mut |r| log_report(&r));
                    if let Err(e) = sink.update(&cell.current()) {
                        log::error!(target: "tscmon::sampler", "state publish failed: {}", e);
                    }
                    log::debug!(target: "tscmon::sampler", "observed delta {}", delta);
                }
            })?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Armed → Idle: cancels the next scheduled firing and waits for the
    /// worker to exit. An in-flight firing runs to completion; only the
    /// next one is prevented. Idempotent, harmless when never armed.
    pub fn disarm(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::atomic::AtomicUsize;

    const STEP: u64 = 1_000;

    thread_local! {
        static TICKS: Cell<u64> = Cell::new(0);
    }

    /// Synthetic counter: advances by STEP on every read, so every firing
    /// observes a delta of exactly STEP.
    fn stepped_read() -> CycleSample {
        TICKS.with(|t| {
            let value = t.get();
            t.set(value + STEP);
            CycleSample {
                value,
                unit: UnitId { socket: 0, core: 1 },
            }
        })
    }

    fn band(low: u64, expected: u64, high: u64) -> Calibration {
        Calibration {
            nominal_hz: 1_000_000,
            expected_delta: expected,
            band_low: low,
            band_high: high,
        }
    }

    struct CountingSink {
        updates: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Self {
            Self {
                updates: AtomicUsize::new(0),
            }
        }
    }

    impl StateSink for CountingSink {
        fn register(&self) -> Result<(), Error> {
            Ok(())
        }
        fn update(&self, _state: &crate::status::JitterState) -> Result<(), Error> {
            self.updates.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn unregister(&self) {}
    }

    #[test]
    fn test_band_edges_are_in_band() {
        let cal = band(285, 300, 315);
        assert!(!out_of_band(285, &cal));
        assert!(!out_of_band(300, &cal));
        assert!(!out_of_band(315, &cal));
        assert!(out_of_band(284, &cal));
        assert!(out_of_band(316, &cal));
    }

    #[test]
    fn test_fire_in_band_emits_no_report() {
        let cell = JitterCell::new();
        let mut reports = Vec::new();
        let cal = band(500, STEP, 1_500);
        let delta = fire(
            &cal,
            Duration::from_millis(1),
            stepped_read,
            &cell,
            &mut |r| reports.push(r),
        );
        assert_eq!(delta, STEP);
        assert!(reports.is_empty());
        assert_eq!(cell.current().last_delta, STEP);
    }

    #[test]
    fn test_fire_out_of_band_emits_one_report_and_still_publishes() {
        let cell = JitterCell::new();
        let mut reports = Vec::new();
        // Band far above the synthetic delta.
        let cal = band(2_000, 2_500, 3_000);
        fire(
            &cal,
            Duration::from_millis(1),
            stepped_read,
            &cell,
            &mut |r| reports.push(r),
        );
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].delta, STEP);
        assert_eq!(reports[0].start_unit, UnitId { socket: 0, core: 1 });
        assert_eq!(reports[0].end_unit, UnitId { socket: 0, core: 1 });
        // The publish is unconditional.
        let state = cell.current();
        assert!(state.initialized);
        assert_eq!(state.last_delta, STEP);
    }

    #[test]
    fn test_consecutive_firings_publish_latest_only() {
        let cell = JitterCell::new();
        let cal = band(500, STEP, 1_500);
        for _ in 0..3 {
            fire(
                &cal,
                Duration::from_millis(1),
                stepped_read,
                &cell,
                &mut |_| {},
            );
        }
        assert_eq!(cell.current().last_delta, STEP);
    }

    #[test]
    fn test_arm_fires_and_disarm_stops() {
        let cell = Arc::new(JitterCell::new());
        let sink = Arc::new(CountingSink::new());
        let cal = band(500, STEP, 1_500);
        let mut sampler =
            Sampler::new(cal, Arc::clone(&cell), Arc::clone(&sink) as Arc<dyn StateSink>, stepped_read);

        sampler.arm(2).unwrap();
        assert!(sampler.is_armed());

        // Plenty of time for several firings at a 2 ms period.
        thread::sleep(Duration::from_millis(100));
        assert!(cell.current().initialized);
        assert_eq!(cell.current().last_delta, STEP);
        assert!(sink.updates.load(Ordering::Relaxed) >= 1);

        sampler.disarm();
        assert!(!sampler.is_armed());

        // No further firings once disarmed.
        let settled = sink.updates.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(sink.updates.load(Ordering::Relaxed), settled);
    }

    #[test]
    fn test_arm_twice_is_a_noop() {
        let cell = Arc::new(JitterCell::new());
        let sink = Arc::new(CountingSink::new());
        let cal = band(500, STEP, 1_500);
        let mut sampler =
            Sampler::new(cal, Arc::clone(&cell), sink, stepped_read);
        sampler.arm(5).unwrap();
        sampler.arm(5).unwrap();
        assert!(sampler.is_armed());
        sampler.disarm();
    }

    #[test]
    fn test_disarm_without_arm_is_harmless() {
        let cell = Arc::new(JitterCell::new());
        let sink = Arc::new(CountingSink::new());
        let cal = band(500, STEP, 1_500);
        let mut sampler = Sampler::new(cal, cell, sink, stepped_read);
        sampler.disarm();
        sampler.disarm();
        assert!(!sampler.is_armed());
    }

    #[test]
    fn test_rearm_after_disarm() {
        let cell = Arc::new(JitterCell::new());
        let sink = Arc::new(CountingSink::new());
        let cal = band(500, STEP, 1_500);
        let mut sampler =
            Sampler::new(cal, Arc::clone(&cell), sink, stepped_read);

        sampler.arm(2).unwrap();
        thread::sleep(Duration::from_millis(30));
        sampler.disarm();

        sampler.arm(2).unwrap();
        assert!(sampler.is_armed());
        sampler.disarm();
    }
}
