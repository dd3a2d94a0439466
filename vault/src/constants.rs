/// Serialized leaf size (bytes) at which a leaf splits.
pub const DEFAULT_MAX_BIN_WIDTH: usize = 53_248;

/// Per-entry bytes of JSON framing (quotes, colon, comma) in a leaf payload.
pub const ENTRY_OVERHEAD: usize = 6;

/// Highest scrypt cost accepted from an envelope header.
pub const MAX_OPS_LIMIT: u32 = 4_194_304;

/// Symmetric key length for every sealed artifact.
pub const KEY_LEN: usize = 32;

/// Pending requests an `IndexHandle` buffers before senders wait.
pub const HANDLE_CHANNEL_CAPACITY: usize = 1024;
