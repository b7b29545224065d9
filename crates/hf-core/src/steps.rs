//! Step units.
//!
//! The engine counts internal steps (one simulated minute each). Everything a
//! user types or sees is a display step, one display step per `FRAME_RATE`
//! internal steps. Gateway calls always take internal steps.
//!
//! `final_step` is exclusive: a run with `final_step = 90` has internal steps
//! `0..90` and display steps `0..2`.

use crate::{HfError, HfResult};

/// Internal steps per display step.
pub const FRAME_RATE: u64 = 45;

/// Largest final step a run may request.
pub const MAX_FINAL_STEP: u64 = 100_000;

/// Simulated seconds covered by one internal step.
pub const SIM_SECONDS_PER_STEP: u64 = 60;

#[inline]
pub fn to_display(internal: u64) -> u64 {
    internal / FRAME_RATE
}

#[inline]
pub fn to_internal(display: u64) -> u64 {
    display * FRAME_RATE
}

/// Check a requested run length: positive, a multiple of the frame rate and
/// within `MAX_FINAL_STEP`.
pub fn validate_final_step(final_step: u64) -> HfResult<u64> {
    if final_step == 0 || final_step > MAX_FINAL_STEP {
        return Err(HfError::OutOfRange {
            what: "final step",
            value: final_step as i64,
            min: FRAME_RATE as i64,
            max: MAX_FINAL_STEP as i64,
        });
    }
    if final_step % FRAME_RATE != 0 {
        return Err(HfError::InvalidArg {
            what: "final step must be a multiple of the frame rate",
        });
    }
    Ok(final_step)
}

/// Valid step range of one result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepDomain {
    final_step: u64,
}

impl StepDomain {
    pub fn new(final_step: u64) -> HfResult<Self> {
        if final_step == 0 {
            return Err(HfError::InvalidArg {
                what: "step domain needs at least one step",
            });
        }
        Ok(Self { final_step })
    }

    /// Widest domain of several results (multi-result playback).
    pub fn union<I: IntoIterator<Item = StepDomain>>(domains: I) -> Option<Self> {
        domains.into_iter().max_by_key(|d| d.final_step)
    }

    pub fn final_step(&self) -> u64 {
        self.final_step
    }

    pub fn last_internal(&self) -> u64 {
        self.final_step - 1
    }

    pub fn last_display(&self) -> u64 {
        to_display(self.last_internal())
    }

    pub fn display_count(&self) -> u64 {
        self.last_display() + 1
    }

    pub fn contains_internal(&self, step: u64) -> bool {
        step < self.final_step
    }

    /// Validate a display step and return the matching internal step.
    pub fn check_display(&self, display: i64) -> HfResult<u64> {
        let max = self.last_display() as i64;
        if display < 0 || display > max {
            return Err(HfError::OutOfRange {
                what: "display step",
                value: display,
                min: 0,
                max,
            });
        }
        Ok(to_internal(display as u64))
    }

    /// Validate an inclusive display range and return internal bounds.
    pub fn check_display_range(&self, from: i64, to: i64) -> HfResult<(u64, u64)> {
        let start = self.check_display(from)?;
        let end = self.check_display(to)?;
        if start > end {
            return Err(HfError::InvalidArg {
                what: "range start is after range end",
            });
        }
        Ok((start, end))
    }
}

/// Render the simulated wall clock of an internal step.
///
/// `00:45:00s` inside the first day, `Day 02, 03:00:00s` afterwards.
pub fn format_sim_time(internal: u64) -> String {
    let total_seconds = internal * SIM_SECONDS_PER_STEP;
    let days = total_seconds / (24 * 3600);
    let remaining = total_seconds % (24 * 3600);
    let hours = remaining / 3600;
    let minutes = (remaining % 3600) / 60;
    let seconds = remaining % 60;

    if days > 0 {
        format!("Day {days:02}, {hours:02}:{minutes:02}:{seconds:02}s")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}s")
    }
}
