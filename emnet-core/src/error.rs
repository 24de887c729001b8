use thiserror::Error;

/// Rejected packet pool layouts. Raised once, at start-up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("At least one pool class is required")]
    NoClasses,

    #[error("Pool class {index} has zero buffers")]
    EmptyClass { index: usize },

    #[error("Pool sizes must be strictly increasing ({prev} then {next})")]
    UnorderedClasses { prev: usize, next: usize },

    #[error("Header reserve {reserve} does not fit in the smallest buffer ({smallest} bytes)")]
    ReserveTooLarge { reserve: usize, smallest: usize },

    #[error("Pool class {index} holds {count} buffers, more than a handle can address")]
    TooManyBuffers { index: usize, count: usize },
}
