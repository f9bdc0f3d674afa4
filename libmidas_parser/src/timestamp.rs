/// Extends a timestamp counter of limited width by counting how often it wrapped.
///
/// Every decoder that needs one owns its own instance, so independent streams never
/// share wrap state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampUnwrapper {
    width: u32,
    last: Option<u64>,
    wraps: u64,
}

impl TimestampUnwrapper {
    pub fn new(width: u32) -> Self {
        Self {
            width,
            last: None,
            wraps: 0,
        }
    }

    /// Extend a raw counter value; a value below the previous one counts as one wrap
    pub fn extend(&mut self, raw: u64) -> u64 {
        let raw = raw & ((1u64 << self.width) - 1);
        if matches!(self.last, Some(last) if raw < last) {
            self.wraps += 1;
        }
        self.last = Some(raw);
        (self.wraps << self.width) | raw
    }

    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Forget everything, used when a new file starts
    pub fn reset(&mut self) {
        self.last = None;
        self.wraps = 0;
    }
}
