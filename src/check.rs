use std::time::Duration;

use crate::calibrate;
use crate::cli::CheckArgs;
use crate::config::SamplerConfig;
use crate::error::Error;
use crate::sampler;
use crate::source::{CpuinfoSource, FreqSource};
use crate::status::JitterCell;
use crate::tsc;

/// One-shot diagnostic: calibrate, run a burst of firings back to back and
/// report where the observed deltas landed relative to the band.
pub fn run(args: &CheckArgs, config: &SamplerConfig) -> Result<(), Error> {
    if args.samples == 0 {
        return Err(Error::InvalidArgs("samples must be greater than 0".into()));
    }
    if !tsc::is_supported() {
        return Err(Error::Unsupported("RDTSCP not available on this CPU"));
    }

    let text = CpuinfoSource::new(&config.cpuinfo).read_text()?;
    let hz = calibrate::parse_frequency(&text)?;
    let cal = calibrate::compute_band(hz, config.period_ms, config.tolerance);

    println!("nominal frequency : {} Hz", cal.nominal_hz);
    println!("sampling period   : {} ms", config.period_ms);
    println!("expected delta    : {} cycles", cal.expected_delta);
    println!("acceptance band   : [{}, {}]", cal.band_low, cal.band_high);
    println!();

    let cell = JitterCell::new();
    let period = Duration::from_millis(config.period_ms);

    let mut out_count = 0u32;
    let mut min = u64::MAX;
    let mut max = 0u64;
    let mut sum = 0u128;

    for i in 0..args.samples {
        let delta = sampler::fire(&cal, period, tsc::read, &cell, &mut |r| {
            out_count += 1;
            eprintln!(
                "  sample {:>3}: out of band: {} ({} to {})",
                i + 1,
                r.delta,
                r.start_unit,
                r.end_unit
            );
        });
        min = min.min(delta);
        max = max.max(delta);
        sum += u128::from(delta);
    }

    let avg = (sum / u128::from(args.samples)) as u64;
    println!("samples           : {}", args.samples);
    println!("delta min/avg/max : {} / {} / {}", min, avg, max);
    println!("out of band       : {}", out_count);

    Ok(())
}
