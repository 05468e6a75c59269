//! The continuation table.
//!
//! A pending future names the guest function to resume by index. Closures
//! cannot cross the boundary, so each "next state" of the registry protocol
//! is a variant of [`Continuation`] and its handler sits at a fixed slot in
//! [`TABLE`]. Index 0 is reserved for "no continuation".

use regwatch_core::{Address, ContinuationIndex, FutureDescriptor, RegwatchError, Result};

use crate::protocol::{self, Chain};

/// Where a chain resumes once its pending fetch settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Continuation {
    /// Manifest response, first attempt.
    Status = 1,
    /// Token response after the first challenge.
    Token = 2,
    /// Token response after a challenge raised by the token endpoint.
    Rechallenge = 3,
    /// Manifest response for the request carrying a bearer token.
    AuthorizedStatus = 4,
    /// Bare GET: hand the response back unchanged.
    Reflect = 5,
}

impl Continuation {
    /// Every continuation in table order.
    pub const ALL: [Continuation; 5] = [
        Self::Status,
        Self::Token,
        Self::Rechallenge,
        Self::AuthorizedStatus,
        Self::Reflect,
    ];

    /// The table index carried in a pending future.
    pub fn index(self) -> ContinuationIndex {
        ContinuationIndex::new(self as u32)
    }

    /// Look up the continuation at `index`.
    pub fn from_index(index: ContinuationIndex) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|continuation| continuation.index() == index)
    }

    /// Name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Token => "token",
            Self::Rechallenge => "rechallenge",
            Self::AuthorizedStatus => "authorized_status",
            Self::Reflect => "reflect",
        }
    }
}

/// Signature shared by every continuation handler.
pub(crate) type ContinuationFn = fn(&mut Chain<'_>, Address, &FutureDescriptor) -> Result<()>;

/// Handlers, one per [`Continuation`], at `index - 1`.
pub(crate) static TABLE: [ContinuationFn; 5] = [
    protocol::on_status,
    protocol::on_token,
    protocol::on_rechallenge,
    protocol::on_authorized_status,
    protocol::on_reflect,
];

/// Resolve an index to its handler.
pub(crate) fn lookup(index: ContinuationIndex) -> Result<ContinuationFn> {
    index
        .as_u32()
        .checked_sub(1)
        .and_then(|slot| TABLE.get(slot as usize))
        .copied()
        .ok_or(RegwatchError::UnknownContinuation { index })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_stable() {
        assert_eq!(Continuation::Status.index().as_u32(), 1);
        assert_eq!(Continuation::Reflect.index().as_u32(), 5);
        for continuation in Continuation::ALL {
            assert_eq!(Continuation::from_index(continuation.index()), Some(continuation));
        }
    }

    #[test]
    fn table_covers_every_continuation() {
        assert_eq!(TABLE.len(), Continuation::ALL.len());
        for continuation in Continuation::ALL {
            assert!(lookup(continuation.index()).is_ok());
        }
    }

    #[test]
    fn zero_and_out_of_range_are_unknown() {
        assert!(Continuation::from_index(ContinuationIndex::NONE).is_none());
        let err = lookup(ContinuationIndex::NONE).err().unwrap();
        assert_eq!(err.code(), "E203");
        assert!(lookup(ContinuationIndex::new(6)).is_err());
    }
}
