use std::fmt;
use std::sync::Arc;

use crate::statement::Strategy;
use crate::translator::ExceptionTranslator;

/// Settings held by one [`QueryRunner`](crate::runner::QueryRunner).
#[derive(Clone)]
pub struct Config {
    /// Overrides the process-wide translator for this runner
    pub translator: Option<Arc<dyn ExceptionTranslator>>,
    /// Log the elapsed time of every execution
    pub profiling: bool,
    /// Ask the driver how many parameters a statement takes. Cleared for the
    /// runner the first time the driver cannot answer.
    pub use_metadata: bool,
    /// Fail on a parameter-count mismatch instead of logging a warning
    pub strict_parameter_count: bool,
    pub strategy: Strategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            translator: None,
            profiling: false,
            use_metadata: true,
            strict_parameter_count: false,
            strategy: Strategy::Eager,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translator(mut self, translator: Arc<dyn ExceptionTranslator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiling = enabled;
        self
    }

    pub fn with_metadata(mut self, enabled: bool) -> Self {
        self.use_metadata = enabled;
        self
    }

    pub fn with_strict_parameter_count(mut self, strict: bool) -> Self {
        self.strict_parameter_count = strict;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("custom_translator", &self.translator.is_some())
            .field("profiling", &self.profiling)
            .field("use_metadata", &self.use_metadata)
            .field("strict_parameter_count", &self.strict_parameter_count)
            .field("strategy", &self.strategy)
            .finish()
    }
}
