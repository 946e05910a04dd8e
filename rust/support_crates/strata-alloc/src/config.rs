//! Allocator configuration: backend selection, debug instrumentation level and pool
//! sizing.

use std::{fmt, str::FromStr};

use strata_common::{Result, error::Error};

use crate::backend::BackendKind;

/// Environment variable selecting the backend of the default allocator.
pub const BACKEND_ENV_VAR: &str = "STRATA_ALLOC_BACKEND";

/// Environment variable selecting the debug mode of the default allocator.
pub const DEBUG_ENV_VAR: &str = "STRATA_ALLOC_DEBUG";

/// Smallest block handed out by the pooled backend.
pub const MIN_POOL_CLASS_SIZE: usize = 16;

/// Largest block served from pool chunks; bigger requests go to the system allocator.
pub const MAX_POOL_CLASS_SIZE: usize = 64 * 1024;

/// Default size of a chunk reserved by the pooled backend.
pub const DEFAULT_POOL_CHUNK_SIZE: usize = 1024 * 1024;

/// Level of bookkeeping layered over the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugMode {
    /// No bookkeeping; misuse is undefined behavior.
    Disabled,
    /// Outstanding-byte counter with a zero-leak assertion at teardown.
    Counting,
    /// Counter plus a pointer registry holding the size and stack trace of every
    /// live allocation.
    Extended,
}

impl DebugMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebugMode::Disabled => "off",
            DebugMode::Counting => "counting",
            DebugMode::Extended => "extended",
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != DebugMode::Disabled
    }
}

impl Default for DebugMode {
    fn default() -> Self {
        if cfg!(feature = "debug-allocation") {
            DebugMode::Extended
        } else if cfg!(debug_assertions) {
            DebugMode::Counting
        } else {
            DebugMode::Disabled
        }
    }
}

impl fmt::Display for DebugMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebugMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "disabled" | "0" | "false" => Ok(DebugMode::Disabled),
            "counting" | "on" | "1" | "true" => Ok(DebugMode::Counting),
            "extended" | "full" => Ok(DebugMode::Extended),
            other => Err(Error::invalid_arg(
                "debug",
                format!("unknown allocator debug mode '{other}'"),
            )),
        }
    }
}

/// Sizing of the pooled backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Bytes reserved from the system each time the pool runs dry. Must be a power of
    /// two no smaller than [`MAX_POOL_CLASS_SIZE`].
    pub chunk_size: usize,
    /// Upper bound on the bytes the pool may reserve from the system, counting chunks
    /// and directly served large blocks. `None` means unbounded.
    pub capacity: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_POOL_CHUNK_SIZE,
            capacity: None,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.chunk_size.is_power_of_two() || self.chunk_size < MAX_POOL_CLASS_SIZE {
            return Err(Error::invalid_arg(
                "chunk_size",
                format!(
                    "must be a power of two of at least {MAX_POOL_CLASS_SIZE} bytes, got {}",
                    self.chunk_size
                ),
            ));
        }
        if self.capacity == Some(0) {
            return Err(Error::invalid_arg("capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Everything needed to construct an [`Allocator`](crate::Allocator).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub backend: BackendKind,
    pub debug: DebugMode,
    pub pool: PoolConfig,
}

impl AllocatorConfig {
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_debug(mut self, debug: DebugMode) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Pooled {
            self.pool.validate()?;
        }
        Ok(())
    }

    /// Builds a configuration from [`BACKEND_ENV_VAR`] and [`DEBUG_ENV_VAR`], using the
    /// defaults for unset variables.
    pub fn from_env() -> Result<AllocatorConfig> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<AllocatorConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AllocatorConfig::default();
        if let Some(backend) = lookup(BACKEND_ENV_VAR) {
            config.backend = backend.parse()?;
        }
        if let Some(debug) = lookup(DEBUG_ENV_VAR) {
            config.debug = debug.parse()?;
        }
        config.validate()?;
        Ok(config)
    }
}
