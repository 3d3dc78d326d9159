use crate::error::Status;

/// Whether a bound backend provides an optional capability.
///
/// `Err` carries the reason it does not, so later misuse reports the true
/// cause ("seek failed: Illegal seek; reading /dev/stdin") rather than a
/// generic "not supported".
pub type Support = Result<(), Status>;

/// A lazily computed, memoized [`Support`] answer.
///
/// Computed at most once per binding; cleared when the owning stream is
/// reset to a new backend.
#[derive(Clone, Debug, Default)]
pub struct CapabilityCell {
    value: Option<Support>,
}

impl CapabilityCell {
    pub const fn new() -> Self {
        Self { value: None }
    }

    /// A cell whose answer is already known.
    pub fn known(support: Support) -> Self {
        Self {
            value: Some(support),
        }
    }

    /// Returns the memoized answer, computing it with `compute` on first use.
    pub fn get_or_compute(&mut self, compute: impl FnOnce() -> Support) -> Support {
        self.value.get_or_insert_with(compute).clone()
    }

    pub fn is_known(&self) -> bool {
        self.value.is_some()
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_once() {
        let mut cell = CapabilityCell::new();
        let mut calls = 0;
        for _ in 0..3 {
            let support = cell.get_or_compute(|| {
                calls += 1;
                Err(Status::unsupported("pipe is not seekable"))
            });
            assert_eq!(
                support.unwrap_err().message(),
                "pipe is not seekable"
            );
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn reset_forgets_answer() {
        let mut cell = CapabilityCell::known(Ok(()));
        assert!(cell.is_known());
        cell.reset();
        assert!(!cell.is_known());
        assert!(cell.get_or_compute(|| Ok(())).is_ok());
    }
}
