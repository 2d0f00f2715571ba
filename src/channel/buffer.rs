//! Channel buffering strategies (`spec.md` §3.4 "Buffering strategies").

/// How many elements a channel holds before a sender must suspend (or an
/// overflow policy kicks in).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capacity {
    /// Capacity zero: a send only completes once a receiver is ready to take
    /// the element directly from the sender's hand (`spec.md` "rendezvous").
    Rendezvous,
    /// A bounded ring of `n` elements.
    Fixed(usize),
    /// Effectively unbounded; `send` never suspends for lack of space.
    Unlimited,
    /// Capacity one, with [`Overflow::DropOldest`] forced: only the most
    /// recently sent element is ever retained (`spec.md` "conflated").
    Conflated,
}

/// What a full buffer does to an incoming send, for every [`Capacity`] other
/// than `Conflated` (which always behaves as `DropOldest`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Overflow {
    /// The sender suspends until space frees up. The only valid policy for
    /// `Rendezvous`/`Fixed`/`Unlimited` capacities that want backpressure.
    #[default]
    SuspendSender,
    /// The oldest buffered element is evicted to make room; the evicted
    /// element's "undelivered element" handler, if any, runs
    /// (`spec.md` §4.9 "cancellation during delivery").
    DropOldest,
    /// The newly sent element is discarded instead; `send` still reports
    /// success to the caller (`spec.md`: overflow is invisible to the
    /// sender under this policy).
    DropLatest,
}

impl Capacity {
    pub fn slot_count(self) -> Option<usize> {
        match self {
            Capacity::Rendezvous => Some(0),
            Capacity::Fixed(n) => Some(n),
            Capacity::Conflated => Some(1),
            Capacity::Unlimited => None,
        }
    }
}
