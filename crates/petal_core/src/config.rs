//! Database configuration.

use crate::error::{CoreError, CoreResult};
use crate::types::{IndexMode, IoType};
use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database directory if it doesn't exist.
    pub create_if_missing: bool,

    /// I/O strategy used for every segment of the database.
    pub io_type: IoType,

    /// Whether the index caches values next to positions.
    pub index_mode: IndexMode,

    /// Size at which the active segment of a data type is sealed.
    pub max_segment_size: u64,

    /// How often the background GC runs (zero = never).
    pub gc_interval: Duration,

    /// Discard ratio a sealed segment must exceed to be compacted.
    pub gc_ratio: f64,

    /// Whether to sync the segment after every append (safer but slower).
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            io_type: IoType::FileIo,
            index_mode: IndexMode::KeyOnly,
            max_segment_size: 64 * 1024 * 1024,           // 64 MB
            gc_interval: Duration::from_secs(8 * 60 * 60), // 8 hours
            gc_ratio: 0.5,
            sync_writes: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the segment I/O strategy.
    #[must_use]
    pub const fn io_type(mut self, io_type: IoType) -> Self {
        self.io_type = io_type;
        self
    }

    /// Sets the index memory mode.
    #[must_use]
    pub const fn index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Sets the segment rotation threshold.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the background GC interval.
    #[must_use]
    pub const fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets the GC discard ratio threshold, clamped to `[0, 1]`.
    #[must_use]
    pub fn gc_ratio(mut self, ratio: f64) -> Self {
        self.gc_ratio = if ratio.is_nan() { ratio } else { ratio.clamp(0.0, 1.0) };
        self
    }

    /// Sets whether to sync after every append.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Checks the configuration before a database is opened with it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` for a zero segment size or a GC ratio that
    /// is not a finite number in `[0, 1]`.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_segment_size == 0 {
            return Err(CoreError::invalid_operation(
                "max_segment_size must be greater than zero",
            ));
        }
        if !self.gc_ratio.is_finite() || !(0.0..=1.0).contains(&self.gc_ratio) {
            return Err(CoreError::invalid_operation(format!(
                "gc_ratio must be within [0, 1], got {}",
                self.gc_ratio
            )));
        }
        Ok(())
    }
}
