//! Dense sysid allocator: a bitmap over `[LM_SYSID, LM_SYSID_MAX]` plus a
//! rolling cursor, matching `nlm_impl.c`'s `nlm_sysid_alloc`/`nlm_sysid_free`.
//!
//! Index 0 is permanently reserved for locks taken by the local host itself
//! and is never handed out by [`SysidAllocator::alloc`].

use tokio::sync::RwLock;

/// Lowest sysid ever handed out. `0` is reserved for local locks.
pub const LM_SYSID: u32 = 1;

/// Highest sysid this allocator will hand out. The sysid namespace stays
/// inside 16 bits so it can be embedded unambiguously wherever a compact
/// owner-handle or NSM `priv` cookie needs to carry it.
pub const LM_SYSID_MAX: u32 = 0xffff;

const BITS_PER_WORD: u32 = u64::BITS;
const WORDS: usize = ((LM_SYSID_MAX + 1) as usize).div_ceil(BITS_PER_WORD as usize);

/// Sentinel returned by [`SysidAllocator::alloc`] when the namespace is full.
pub const NOSYSID: u32 = 0;

struct Bitmap {
    words: Vec<u64>,
    cursor: u32,
}

impl Bitmap {
    fn new() -> Self {
        let mut words = vec![0u64; WORDS];
        // Mark sysid 0 as permanently taken.
        words[0] |= 1;
        Self { words, cursor: LM_SYSID }
    }

    fn is_set(&self, sysid: u32) -> bool {
        let word = (sysid / BITS_PER_WORD) as usize;
        let bit = sysid % BITS_PER_WORD;
        self.words[word] & (1u64 << bit) != 0
    }

    fn set(&mut self, sysid: u32) {
        let word = (sysid / BITS_PER_WORD) as usize;
        let bit = sysid % BITS_PER_WORD;
        self.words[word] |= 1u64 << bit;
    }

    fn clear(&mut self, sysid: u32) {
        let word = (sysid / BITS_PER_WORD) as usize;
        let bit = sysid % BITS_PER_WORD;
        self.words[word] &= !(1u64 << bit);
    }

    /// Probes the cursor first, then does a full linear scan from
    /// `LM_SYSID`, mirroring the source's "try the cursor, then search"
    /// fallback so allocation stays O(1) in the common case.
    fn alloc(&mut self) -> u32 {
        if !self.is_set(self.cursor) {
            let found = self.cursor;
            self.set(found);
            self.advance_cursor();
            return found;
        }

        for candidate in LM_SYSID..=LM_SYSID_MAX {
            if !self.is_set(candidate) {
                self.set(candidate);
                self.cursor = candidate;
                self.advance_cursor();
                return candidate;
            }
        }

        NOSYSID
    }

    fn advance_cursor(&mut self) {
        self.cursor = if self.cursor >= LM_SYSID_MAX { LM_SYSID } else { self.cursor + 1 };
    }
}

/// Process-wide (or per-registry) sysid allocator. All mutations go through
/// a single writer lock, matching `lm_lck` in the concurrency model.
pub struct SysidAllocator {
    bitmap: RwLock<Bitmap>,
}

impl Default for SysidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SysidAllocator {
    pub fn new() -> Self {
        Self { bitmap: RwLock::new(Bitmap::new()) }
    }

    /// Allocates the next free sysid, or [`NOSYSID`] if the namespace is
    /// exhausted.
    pub async fn alloc(&self) -> u32 {
        self.bitmap.write().await.alloc()
    }

    /// Releases a previously allocated sysid. Freeing sysid 0 is forbidden.
    ///
    /// # Panics
    ///
    /// Panics if `sysid == 0`; callers must never have obtained 0 from
    /// [`Self::alloc`] in the first place.
    pub async fn free(&self, sysid: u32) {
        assert_ne!(sysid, NOSYSID, "sysid 0 (local) must never be freed");
        self.bitmap.write().await.clear(sysid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "current_thread")]
    async fn sysid_zero_is_never_allocated() {
        let alloc = SysidAllocator::new();
        for _ in 0..1000 {
            assert_ne!(alloc.alloc().await, 0);
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn freed_sysid_is_reused() {
        let alloc = SysidAllocator::new();
        let a = alloc.alloc().await;
        let b = alloc.alloc().await;
        assert_ne!(a, b);

        alloc.free(a).await;

        // Exhaust everything else; `a` must still be obtainable.
        let mut seen = std::collections::HashSet::new();
        seen.insert(b);
        let mut reused = false;
        loop {
            let s = alloc.alloc().await;
            if s == NOSYSID {
                break;
            }
            if s == a {
                reused = true;
                break;
            }
            seen.insert(s);
        }
        assert!(reused, "freed sysid should eventually be reallocated");
    }

    #[tokio::test(flavor = "current_thread")]
    #[should_panic(expected = "sysid 0")]
    async fn freeing_sysid_zero_panics() {
        let alloc = SysidAllocator::new();
        alloc.free(0).await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn namespace_exhaustion_returns_nosysid() {
        let alloc = SysidAllocator::new();
        let mut count = 0u32;
        loop {
            let s = alloc.alloc().await;
            if s == NOSYSID {
                break;
            }
            count += 1;
            assert!((LM_SYSID..=LM_SYSID_MAX).contains(&s));
        }
        assert_eq!(count, LM_SYSID_MAX - LM_SYSID + 1);
    }
}
