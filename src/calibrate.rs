use crate::error::Error;

/// Expected per-period cycle delta and the acceptance band around it,
/// derived once at startup. `band_low <= expected_delta <= band_high`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub nominal_hz: u64,
    pub expected_delta: u64,
    pub band_low: u64,
    pub band_high: u64,
}

/// Parses the leading base-10 digits of `s`, ignoring anything after them.
fn leading_number(s: &str) -> Option<u64> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    s[..end].parse().ok()
}

/// Extracts the announced CPU clock rate from a cpuinfo-style text.
///
/// The first line mentioning `MHz` is used, expected as
/// `<label>: <integer>[.<digits>]` megahertz. The fractional part is taken
/// to carry exactly three digits (millihertz, the /proc/cpuinfo convention):
/// `hz = int * 1_000_000 + frac * 1_000`. A fraction with a different digit
/// count scales the result accordingly; that format constraint is on the
/// input, not compensated for here.
pub fn parse_frequency(text: &str) -> Result<u64, Error> {
    let line = text
        .lines()
        .find(|l| l.contains("MHz"))
        .ok_or(Error::FrequencyNotFound)?;
    let value = match line.split_once(':') {
        Some((_, v)) => v.trim_start(),
        None => return Err(Error::FrequencyNotFound),
    };

    let (int_str, frac_str) = match value.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (value, None),
    };

    let int_part = leading_number(int_str).ok_or(Error::FrequencyNotFound)?;
    let frac_part = frac_str.and_then(leading_number).unwrap_or(0);

    let hz = int_part * 1_000_000 + frac_part * 1_000;
    if hz == 0 {
        return Err(Error::ZeroFrequency);
    }
    Ok(hz)
}

/// Derives the expected cycle delta for one sampling period and the
/// acceptance band around it. The tolerance fraction is applied in integer
/// parts-per-million, so the band edges are the exact truncated values of
/// `expected * (1 ± tolerance)`.
pub fn compute_band(nominal_hz: u64, period_ms: u64, tolerance: f64) -> Calibration {
    let expected_delta = nominal_hz * period_ms / 1000;
    let tol_ppm = (tolerance * 1_000_000.0).round() as u64;
    let band_low = expected_delta * (1_000_000 - tol_ppm.min(1_000_000)) / 1_000_000;
    let band_high = expected_delta * (1_000_000 + tol_ppm) / 1_000_000;
    Calibration {
        nominal_hz,
        expected_delta,
        band_low,
        band_high,
    }
}
