//! Default configuration values and on-disk format constants for the
//! hint lifecycle engine.

// ============================================================================
// Segment frame format (magic bytes, little-endian u32)
// ============================================================================

/// Hint segment frame magic: "HNT1"
pub const FRAME_MAGIC: u32 = 0x31544e48;

pub const FRAME_VERSION: u16 = 1;

/// Flag bit: frame was written without a CRC32 (never set by this crate;
/// reserved so future on-disk variants can skip verification deliberately).
pub const FRAME_FLAG_CRC32_DISABLED: u16 = 1 << 0;

/// magic(4) + version(2) + flags(2) + replay_position(8) + schema_version(4)
/// + table_len(2) + payload_len(4) + crc32(4)
pub const FRAME_HEADER_SIZE: usize = 4 + 2 + 2 + 8 + 4 + 2 + 4 + 4;

/// Guards against a corrupt length field turning a bad read into an
/// unbounded allocation.
pub const MAX_FRAME_PAYLOAD_BYTES: u32 = 64 * 1024 * 1024;

// ============================================================================
// Filesystem layout
// ============================================================================

/// Fixed filename prefix; the suffix is a zero-padded, strictly increasing
/// sequence number so directory listings sort in write order.
pub const SEGMENT_FILENAME_PREFIX: &str = "hint-";

pub const SEGMENT_FILENAME_SUFFIX_WIDTH: usize = 10;

// ============================================================================
// HintsConfig defaults (§6)
// ============================================================================

/// 10 MiB admission cap on unflushed (in-progress) hint bytes per endpoint.
pub const DEFAULT_MAX_SIZE_OF_HINTS_IN_PROGRESS: u64 = 10 * 1024 * 1024;

/// Segments seal at 32 MiB.
pub const DEFAULT_HINT_SEGMENT_SIZE_MB: u64 = 32;

/// Advisory per-endpoint fairness cap consulted by the space watchdog.
pub const DEFAULT_MAX_HINTS_PER_EP_SIZE_MB: u64 = 128;

/// At most this many hints from one segment replay concurrently.
pub const DEFAULT_MAX_HINTS_SEND_QUEUE_LENGTH: usize = 128;

pub const DEFAULT_HINTS_FLUSH_PERIOD_MS: u64 = 10_000;

pub const DEFAULT_HINT_FILE_WRITE_TIMEOUT_MS: u64 = 2_000;

pub const DEFAULT_WATCHDOG_PERIOD_MS: u64 = 10_000;

/// Default shard-wide send budget: 10% of a nominal 1 GiB shard memory
/// allowance. Hosts with a different memory budget should override this.
pub const DEFAULT_MAX_SEND_IN_FLIGHT_MEMORY: u64 = 1024 * 1024 * 1024 / 10;

/// Floor on the semaphore permit size acquired per hint, so tiny mutations
/// cannot let an unbounded number of concurrent sends through.
pub const DEFAULT_MIN_SEND_HINT_BUDGET: u64 = 64;

/// Suppress hinting for peers unseen longer than this.
pub const DEFAULT_MAX_HINT_WINDOW_MS: u64 = 3 * 60 * 60 * 1000;

/// Fallback grace period (per-table values should normally override this)
/// after which an un-replayed hint is considered expired.
pub const DEFAULT_GRACE_SECONDS: u64 = 10 * 60 * 60;
