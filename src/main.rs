mod calibrate;
mod check;
mod cli;
mod config;
mod error;
mod logging;
mod monitor;
mod sampler;
mod source;
mod status;
mod tsc;

use std::path::Path;
use std::process;
use std::time::Duration;

use clap::Parser;

use cli::{Cli, Command, SamplerArgs};
use config::SamplerConfig;
use error::Error;
use source::FreqSource;

/// Build a SamplerConfig by layering: defaults → TOML file → CLI overrides.
fn build_sampler_config(config_file: Option<&Path>, args: &SamplerArgs) -> SamplerConfig {
    let mut cfg = match config::load_config(config_file) {
        Ok(c) => c.sampler,
        Err(e) => {
            log::warn!("{}", e);
            SamplerConfig::default()
        }
    };

    // Apply CLI overrides (only if explicitly set)
    if let Some(v) = args.period_ms {
        cfg.period_ms = v;
    }
    if let Some(v) = args.tolerance {
        cfg.tolerance = v;
    }
    if let Some(ref v) = args.cpuinfo {
        cfg.cpuinfo = v.clone();
    }

    cfg.validate();
    cfg
}

/// One-shot measurement: calibrate, run a single firing, print the state line.
fn run_sample(config: &SamplerConfig) -> Result<(), Error> {
    if !tsc::is_supported() {
        return Err(Error::Unsupported("RDTSCP not available on this CPU"));
    }

    let text = source::CpuinfoSource::new(&config.cpuinfo).read_text()?;
    let hz = calibrate::parse_frequency(&text)?;
    let cal = calibrate::compute_band(hz, config.period_ms, config.tolerance);

    let cell = status::JitterCell::new();
    sampler::fire(
        &cal,
        Duration::from_millis(config.period_ms),
        tsc::read,
        &cell,
        &mut |r| sampler::log_report(&r),
    );
    print!("{}", status::render(&cell.current()));
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    match &cli.command {
        Some(Command::Monitor(args)) => {
            logging::init(&args.log, true);
            let config = build_sampler_config(args.config_file.as_deref(), &args.sampler);
            if let Err(e) = monitor::run(args, &config) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
        Some(Command::Check(args)) => {
            logging::init(&args.log, false);
            let config = build_sampler_config(args.config_file.as_deref(), &args.sampler);
            if let Err(e) = check::run(args, &config) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
        None => {
            logging::init(&cli.log, false);
            let config = build_sampler_config(cli.config_file.as_deref(), &cli.sampler);
            if let Err(e) = run_sample(&config) {
                log::error!("{}", e);
                process::exit(1);
            }
        }
    }
}
