//! Progress events emitted while runs advance.

use hf_core::{ResultId, RunOrder};

use crate::lifecycle::RunLifecycle;

/// Percent of `final_step` reached, clamped to `[0, 100]`.
pub fn progress_percent(current_step: Option<i64>, final_step: u64) -> f64 {
    match current_step {
        Some(step) if final_step > 0 => {
            let percent = step as f64 / final_step as f64 * 100.0;
            percent.clamp(0.0, 100.0)
        }
        _ => 0.0,
    }
}

/// One applied poll result.
#[derive(Debug, Clone, PartialEq)]
pub struct RunProgressEvent {
    pub order: RunOrder,
    pub result_id: Option<ResultId>,
    pub previous: RunLifecycle,
    pub lifecycle: RunLifecycle,
    pub current_step: Option<i64>,
    pub progress_percent: f64,
    pub download_url: Option<String>,
}

impl RunProgressEvent {
    pub fn lifecycle_changed(&self) -> bool {
        self.previous != self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn percent_examples() {
        assert_eq!(progress_percent(None, 90), 0.0);
        assert_eq!(progress_percent(Some(45), 90), 50.0);
        assert_eq!(progress_percent(Some(900), 90), 100.0);
        assert_eq!(progress_percent(Some(-10), 90), 0.0);
        assert_eq!(progress_percent(Some(10), 0), 0.0);
    }

    proptest! {
        #[test]
        fn percent_is_always_clamped(step in any::<i64>(), final_step in 0u64..=100_000) {
            let percent = progress_percent(Some(step), final_step);
            prop_assert!((0.0..=100.0).contains(&percent));
        }
    }
}
