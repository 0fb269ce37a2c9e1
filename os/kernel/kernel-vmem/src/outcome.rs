/// Result of an operation that may legitimately do nothing.
///
/// `Skipped` carries the typed reason; hard failures travel separately
/// in a `Result`.
#[must_use]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome<R> {
    /// The operation changed state.
    Applied,
    /// Nothing happened, for the given reason.
    Skipped(R),
}

impl<R> Outcome<R> {
    #[inline]
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    #[inline]
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// The skip reason, if any.
    #[inline]
    #[must_use]
    pub const fn reason(&self) -> Option<&R> {
        match self {
            Self::Applied => None,
            Self::Skipped(r) => Some(r),
        }
    }
}
