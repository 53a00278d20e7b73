//! Caller-input validation shared by the tile mapper and rasterizer.
//!
//! `ShapeCheck` accumulates a batch of named length checks and reports the
//! first mismatch as a [`RasterError`] instead of panicking on an
//! out-of-bounds slice index. `check_finite_slice` is only ever called from
//! debug builds - scanning every buffer on every call is too expensive for
//! release.

use crate::error::{RasterError, Result};

/// Accumulates named `(actual, expected)` length checks, short-circuiting on
/// the first failure once [`finish`](ShapeCheck::finish) is called.
#[derive(Default)]
pub struct ShapeCheck {
    failure: Option<RasterError>,
}

impl ShapeCheck {
    pub fn new() -> Self {
        Self { failure: None }
    }

    pub fn check(mut self, name: &'static str, got: usize, expected: usize) -> Self {
        if self.failure.is_none() && got != expected {
            self.failure = Some(RasterError::ShapeMismatch {
                name,
                expected: expected.to_string(),
                got: got.to_string(),
            });
        }
        self
    }

    pub fn finish(self) -> Result<()> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Scans `values` for NaN/infinity and returns the first offender, if any.
///
/// Callers gate this behind `cfg!(debug_assertions)` so release builds pay
/// nothing for it, matching the reference implementation's `debug=True`
/// `check_finite` flag.
pub fn check_finite_slice(field: &'static str, values: &[f32]) -> Result<()> {
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(RasterError::NonFinite {
                field,
                index,
                value,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_check_passes_when_all_match() {
        ShapeCheck::new()
            .check("a", 3, 3)
            .check("b", 5, 5)
            .finish()
            .expect("matching shapes");
    }

    #[test]
    fn shape_check_reports_first_mismatch() {
        let err = ShapeCheck::new()
            .check("a", 3, 3)
            .check("b", 4, 5)
            .check("c", 10, 1)
            .finish()
            .unwrap_err();
        match err {
            RasterError::ShapeMismatch { name, .. } => assert_eq!(name, "b"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finite_scan_flags_first_nan() {
        let values = [1.0, 2.0, f32::NAN, 4.0];
        let err = check_finite_slice("values", &values).unwrap_err();
        match err {
            RasterError::NonFinite { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn finite_scan_accepts_all_finite() {
        let values = [1.0, -2.0, 0.0, 3.5];
        check_finite_slice("values", &values).expect("all finite");
    }
}
