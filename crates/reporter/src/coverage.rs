//! Coverage collaborator seam
//!
//! The reporter neither builds nor inspects coverage data. It only tells an
//! opaque delegate when a run starts and when it completes, so the delegate
//! can produce its on-disk artifact with correct timing.

use specstream_common::BrowserInfo;

/// Opaque coverage collaborator notified of run and browser boundaries.
pub trait CoverageDelegate {
    fn run_started(&mut self, _browsers: &[BrowserInfo]) {}

    /// One call per browser that participated in the run, in the order
    /// their nodes were created, before [`run_complete`].
    ///
    /// [`run_complete`]: CoverageDelegate::run_complete
    fn browser_complete(&mut self, _browser: &BrowserInfo) {}

    fn run_complete(&mut self, _browsers: &[BrowserInfo]) {}
}

/// Delegate used when no coverage integration is configured.
pub struct NoopCoverage;

impl CoverageDelegate for NoopCoverage {}
