pub const MAX_TITLE_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 4096;
pub const MAX_NAME_LEN: usize = 256;

pub const MAX_EVENTS: usize = 1_000_000;
pub const MAX_RESOURCES: usize = 100_000;
pub const MAX_ALLOCATIONS_PER_RESOURCE: usize = 100_000;

/// Explicit resource sets in a utilization request.
pub const MAX_REPORT_RESOURCES: usize = 1_000;

/// Longest accepted protocol line in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Largest bincode payload of a single WAL record. Longer length prefixes are
/// treated as a damaged tail.
pub const MAX_WAL_RECORD_LEN: usize = 1024 * 1024;
