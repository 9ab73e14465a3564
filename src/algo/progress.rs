//! Progress reporting and cancellation for long-running algorithms.
//!
//! This module provides a simple progress callback mechanism that algorithms
//! can use to report their progress to callers. The callback's return value
//! lets the caller cancel the operation at the next checkpoint.
//!
//! # Example
//!
//! ```
//! use quadriflow::algo::progress::Progress;
//!
//! let progress = Progress::new(|current, total, message| {
//!     println!("[{}/{}] {}", current, total, message);
//!     false // keep going
//! });
//! assert!(!progress.report(1, 9, "Orientation field"));
//! ```

/// A progress callback that receives updates during long-running operations.
///
/// The callback receives:
/// - `current`: Number of completed steps
/// - `total`: Total number of steps
/// - `message`: Description of the step that just finished
///
/// and returns `true` to request cancellation.
pub struct Progress {
    callback: Box<dyn Fn(usize, usize, &str) -> bool + Send + Sync>,
}

impl Progress {
    /// Create a new progress reporter with the given callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(usize, usize, &str) -> bool + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Report progress. Returns `true` if the caller asked to cancel.
    #[inline]
    pub fn report(&self, current: usize, total: usize, message: &str) -> bool {
        (self.callback)(current, total, message)
    }

    /// Fraction of work done in `[0, 1]` for a step count.
    #[inline]
    pub fn fraction(current: usize, total: usize) -> f64 {
        if total == 0 {
            return 1.0;
        }
        (current.min(total) as f64) / (total as f64)
    }

    /// Create a no-op progress reporter that never cancels.
    pub fn none() -> Self {
        Self::new(|_, _, _| false)
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}
