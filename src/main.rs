//! Replays captured mouse reports through the decoder and accumulator.
//!
//! ```text
//! turret-mouse-replay [DEVICE NAME] < reports.txt
//! ```
//!
//! Each input line is one report as hex bytes, optionally prefixed by the
//! characteristic instance (`1: 0a f0 ff`). One JSON snapshot is printed
//! per decoded line.

use anyhow::{anyhow, Context};
use std::io::{self, BufRead, Write};
use tracing::{info, warn};
use turret_mouse::domain::motion::MotionAccumulator;
use turret_mouse::domain::report;
use turret_mouse::infrastructure::logging;
use turret_mouse::{MouseReport, ProfileRegistry, SettingsService};

fn parse_line(line: &str) -> anyhow::Result<MouseReport> {
    let (instance, hex) = match line.split_once(':') {
        Some((instance, rest)) => (
            instance
                .trim()
                .parse::<u16>()
                .with_context(|| format!("bad instance {:?}", instance))?,
            rest,
        ),
        None => (0, line),
    };

    let digits: String = hex.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        return Err(anyhow!("expected pairs of hex digits"));
    }
    let bytes = (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .context("invalid hex")?;

    Ok(MouseReport::new(instance, bytes))
}

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();
    let _log_guard = logging::init_logger(&settings.log_settings)?;

    let device_name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Turret Mouse".to_string());
    let registry = ProfileRegistry::new(settings.profiles.clone());
    let profile = registry
        .by_name(&device_name)
        .ok_or_else(|| anyhow!("no report profile for {:?}", device_name))?;
    info!(
        "Replaying reports as {} ({:?} layout)",
        profile.device_name, profile.layout
    );

    let mut motion = MotionAccumulator::new();
    motion.set_display_resolution(settings.display_width, settings.display_height);
    motion.set_sensitivity(settings.sensitivity_x, settings.sensitivity_y);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (number, line) in io::stdin().lock().lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let report = match parse_line(line) {
            Ok(report) => report,
            Err(e) => {
                warn!("line {}: {}", number + 1, e);
                continue;
            }
        };
        match report::decode(Some(profile.layout), &report) {
            Ok(delta) => motion.apply(delta),
            Err(e) => {
                warn!("line {}: {}", number + 1, e);
                continue;
            }
        }

        serde_json::to_writer(&mut out, &motion.take_snapshot())?;
        writeln!(out)?;
    }

    Ok(())
}
