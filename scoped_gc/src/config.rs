//! Scope allocator configuration parameters.
//!
//! Ledger growth and shrink behavior is tunable for different workloads.
//! Default values match the reference runtime's ledger constants.

/// What to do with a still-referenced object whose scope is closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatingPolicy {
    /// Move the object to the enclosing scope, like an implicit return value.
    Promote,
    /// Refuse the exit. `try_exit` reports the object and leaves the ledger untouched.
    Reject,
}

/// Configuration for a [`ScopeContext`](crate::ScopeContext).
///
/// # Example
///
/// ```ignore
/// use scoped_gc::{FloatingPolicy, ScopeGcConfig};
///
/// // Strict configuration for testing generated code
/// let config = ScopeGcConfig {
///     floating_policy: FloatingPolicy::Reject,
///     verify_ledger: true,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct ScopeGcConfig {
    // =========================================================================
    // Ledger
    // =========================================================================
    /// Number of entries the ledger allocates on its first append.
    ///
    /// Default: 256
    pub initial_capacity: usize,

    /// Factor the ledger grows and shrinks its capacity by.
    ///
    /// Default: 2
    pub scale_factor: usize,

    /// The ledger shrinks once its length drops below `capacity / shrink_divisor`.
    ///
    /// Shrinking never happens while capacity is at or below
    /// `scale_factor * initial_capacity`.
    ///
    /// Default: 4
    pub shrink_divisor: usize,

    // =========================================================================
    // Heap
    // =========================================================================
    /// Maximum live payload bytes before allocation fails.
    ///
    /// Set to 0 for unlimited (bounded only by system memory).
    ///
    /// Default: 0 (unlimited)
    pub max_heap_bytes: usize,

    // =========================================================================
    // Collection
    // =========================================================================
    /// Handling of referenced objects found in a closing scope.
    ///
    /// Default: `FloatingPolicy::Promote`
    pub floating_policy: FloatingPolicy,

    // =========================================================================
    // Debugging
    // =========================================================================
    /// Log a summary of every collection at debug level.
    ///
    /// Default: false
    pub trace: bool,

    /// Verify ledger integrity after each scope exit.
    ///
    /// Expensive but useful for debugging code generators.
    ///
    /// Default: false (enabled in debug builds)
    pub verify_ledger: bool,
}

impl Default for ScopeGcConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 256,
            scale_factor: 2,
            shrink_divisor: 4,
            max_heap_bytes: 0,
            floating_policy: FloatingPolicy::Promote,
            trace: false,
            verify_ledger: cfg!(debug_assertions),
        }
    }
}

impl ScopeGcConfig {
    /// Create a configuration optimized for low memory usage.
    pub fn low_memory() -> Self {
        Self {
            initial_capacity: 32,
            shrink_divisor: 2,
            ..Default::default()
        }
    }

    /// Create a configuration optimized for high throughput.
    pub fn high_throughput() -> Self {
        Self {
            initial_capacity: 4096,
            scale_factor: 4,
            shrink_divisor: 16,
            verify_ledger: false,
            ..Default::default()
        }
    }

    /// Resolve configuration from the defaults and `SCOPED_GC_*` environment variables.
    ///
    /// Values that fail to parse keep their default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let initial_capacity =
            Self::env_usize("SCOPED_GC_INITIAL_CAPACITY").unwrap_or(defaults.initial_capacity);
        let max_heap_bytes =
            Self::env_usize("SCOPED_GC_MAX_HEAP").unwrap_or(defaults.max_heap_bytes);
        let floating_policy = Self::env_floating().unwrap_or(defaults.floating_policy);
        let trace = Self::env_flag("SCOPED_GC_TRACE").unwrap_or(defaults.trace);
        let verify_ledger = Self::env_flag("SCOPED_GC_VERIFY").unwrap_or(defaults.verify_ledger);

        Self {
            initial_capacity,
            max_heap_bytes,
            floating_policy,
            trace,
            verify_ledger,
            ..defaults
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capacity == 0 {
            return Err(ConfigError::InvalidInitialCapacity);
        }
        if self.scale_factor < 2 {
            return Err(ConfigError::InvalidScaleFactor);
        }
        if self.shrink_divisor < self.scale_factor {
            return Err(ConfigError::InvalidShrinkDivisor);
        }
        Ok(())
    }

    /// Capacity at or below which the ledger never shrinks.
    #[inline]
    pub fn shrink_floor(&self) -> usize {
        self.scale_factor.saturating_mul(self.initial_capacity)
    }

    fn env_usize(var: &str) -> Option<usize> {
        std::env::var(var).ok()?.trim().parse().ok()
    }

    /// `Some(true)` for a non-empty value other than `0`, `Some(false)` for `0`.
    fn env_flag(var: &str) -> Option<bool> {
        match std::env::var(var) {
            Ok(val) if val.is_empty() => None,
            Ok(val) => Some(val != "0"),
            Err(_) => None,
        }
    }

    fn env_floating() -> Option<FloatingPolicy> {
        match std::env::var("SCOPED_GC_FLOATING").ok()?.as_str() {
            "promote" => Some(FloatingPolicy::Promote),
            "reject" => Some(FloatingPolicy::Reject),
            _ => None,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Initial capacity must be at least 1.
    InvalidInitialCapacity,
    /// Scale factor must be at least 2.
    InvalidScaleFactor,
    /// Shrink divisor must not be smaller than the scale factor.
    InvalidShrinkDivisor,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidInitialCapacity => write!(f, "initial capacity must be at least 1"),
            ConfigError::InvalidScaleFactor => write!(f, "scale factor must be at least 2"),
            ConfigError::InvalidShrinkDivisor => {
                write!(f, "shrink divisor must be at least the scale factor")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
