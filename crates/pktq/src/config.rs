/// Largest descriptor length the drain will believe. Anything above this is
/// a corrupted ring in debug builds.
pub const MAX_SANE_LEN: usize = 2048;

/// Minimum Ethernet frame body; shorter payloads are zero padded up to this
/// in the copy region.
pub const MIN_COPY_LEN: usize = 64;

/// Configuration for the transmit core.
#[derive(Debug, Clone, Copy)]
pub struct TxConfig {
    /// Largest frame the engine will build, in bytes. Driver MTU plus
    /// overhead; typically 1514 for plain Ethernet.
    pub max_len: usize,
    /// Bytes per transmit-ring half. Rounded up to 8-byte granularity by
    /// the ring.
    pub ring_size: usize,
    /// Slots in each CPU-local buffer pool.
    pub pool_size: usize,
}

impl TxConfig {
    /// Creates a configuration with custom settings.
    ///
    /// # Panics
    ///
    /// Panics if `max_len` is outside `[MIN_COPY_LEN, MAX_SANE_LEN]`, if
    /// `ring_size` cannot hold a single full descriptor, or if `pool_size`
    /// is too small to hold anything (the pool keeps one slot empty).
    pub const fn new(max_len: usize, ring_size: usize, pool_size: usize) -> Self {
        assert!(
            max_len >= MIN_COPY_LEN && max_len <= MAX_SANE_LEN,
            "max_len must be between the minimum frame and the sane ceiling"
        );
        assert!(
            ring_size >= 16 + MAX_SANE_LEN,
            "ring_size must hold at least one full descriptor"
        );
        assert!(pool_size >= 2, "pool_size must be at least 2");

        Self {
            max_len,
            ring_size,
            pool_size,
        }
    }
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            max_len: 1514,
            ring_size: 64 * 1024,
            pool_size: 1024,
        }
    }
}
