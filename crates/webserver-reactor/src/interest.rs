use bitflags::bitflags;

bitflags! {
    /// Interest mask / revents mask for a watch entry.
    ///
    /// Mirrors the `poll(2)` event bits the original reactor watched:
    /// readable, writable, and hangup. `HANGUP` can never usefully be
    /// *requested* on its own (the OS reports it whenever the peer goes
    /// away, regardless of what was asked for) but callers still name it
    /// in the interest mask they register so the intent reads the same as
    /// the revents they receive back.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Interest: u8 {
        const READABLE = 0b001;
        const WRITABLE = 0b010;
        const HANGUP   = 0b100;
    }
}

impl Interest {
    pub fn is_readable(self) -> bool {
        self.contains(Interest::READABLE)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Interest::WRITABLE)
    }

    pub fn is_hangup(self) -> bool {
        self.contains(Interest::HANGUP)
    }
}

bitflags! {
    /// Per-entry flags. Only one bit exists today: whether the entry
    /// survives its own dispatch.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct WatchFlags: u8 {
        /// If set, the entry stays registered after firing. If clear, the
        /// reactor enqueues a removal for this fd before invoking the
        /// callback, so a callback that re-registers itself is not undone
        /// by its own auto-removal (see `P2` in the crate's module docs).
        const REPEAT = 0b1;
    }
}
