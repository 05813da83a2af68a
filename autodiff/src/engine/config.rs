/// Knobs for an [`Engine`](super::Engine).
///
/// ```
/// use autodiff::engine::EngineOptions;
///
/// let options = EngineOptions::default().with_warnings_as_errors(true);
/// assert_eq!(options.max_call_depth, 256);
/// assert!(options.warnings_as_errors);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Bound on nested calls while evaluating and while checking.
    pub max_call_depth: usize,
    /// Reject requests that only produce warnings.
    pub warnings_as_errors: bool,
    /// Warn when a result does not depend on the differentiation
    /// arguments.
    pub report_nonvaried_results: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            warnings_as_errors: false,
            report_nonvaried_results: true,
        }
    }
}

impl EngineOptions {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    pub fn with_report_nonvaried_results(mut self, enabled: bool) -> Self {
        self.report_nonvaried_results = enabled;
        self
    }
}
