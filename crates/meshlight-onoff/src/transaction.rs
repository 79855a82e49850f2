//! Single-slot duplicate suppression for SET transactions.
//!
//! Senders repeat a logical user action with the same transaction id while the
//! transport retries or floods. Only the immediately preceding
//! `(transaction id, source)` pair is remembered.

use tracing::trace;

use crate::address::Address;

/// The most recently admitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRecord {
    pub tid: u8,
    pub src: Address,
}

/// Why the filter turned a SET away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Same `(tid, src)` as the last admitted transaction.
    Duplicate,
    /// New transaction, but it asks for the value we already have.
    NoOp,
}

/// One-entry transaction cache.
#[derive(Debug, Default, Clone)]
pub struct TransactionFilter {
    last: Option<TransactionRecord>,
}

impl TransactionFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Admit or reject a SET.
    ///
    /// On admission the `(tid, src)` pair becomes the new record. Rejections
    /// leave the record untouched.
    pub fn admit(
        &mut self,
        tid: u8,
        src: Address,
        new_value: bool,
        current_value: bool,
    ) -> Result<(), Rejection> {
        let record = TransactionRecord { tid, src };

        if self.last == Some(record) {
            trace!(tid, %src, "duplicate transaction");
            return Err(Rejection::Duplicate);
        }

        if new_value == current_value {
            trace!(tid, %src, value = new_value, "no-op transaction");
            return Err(Rejection::NoOp);
        }

        self.last = Some(record);
        Ok(())
    }

    /// The last admitted transaction, if any.
    pub fn last(&self) -> Option<TransactionRecord> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: Address = Address(0x0010);

    #[test]
    fn first_transaction_admitted() {
        let mut filter = TransactionFilter::new();
        assert_eq!(filter.admit(1, SRC, true, false), Ok(()));
        assert_eq!(filter.last(), Some(TransactionRecord { tid: 1, src: SRC }));
    }

    #[test]
    fn retransmission_rejected() {
        let mut filter = TransactionFilter::new();
        filter.admit(7, SRC, true, false).unwrap();
        // value already flipped by the first delivery
        assert_eq!(filter.admit(7, SRC, false, true), Err(Rejection::Duplicate));
    }

    #[test]
    fn same_tid_from_other_source_is_new() {
        let mut filter = TransactionFilter::new();
        filter.admit(7, SRC, true, false).unwrap();
        assert_eq!(filter.admit(7, Address(0x0011), false, true), Ok(()));
    }

    #[test]
    fn no_op_rejected_and_not_recorded() {
        let mut filter = TransactionFilter::new();
        assert_eq!(filter.admit(3, SRC, false, false), Err(Rejection::NoOp));
        assert_eq!(filter.last(), None);
        // the same pair is still admissible once it carries a change
        assert_eq!(filter.admit(3, SRC, true, false), Ok(()));
    }

    #[test]
    fn only_one_slot_is_remembered() {
        let mut filter = TransactionFilter::new();
        filter.admit(1, SRC, true, false).unwrap();
        filter.admit(2, SRC, false, true).unwrap();
        // tid 1 fell out of the cache
        assert_eq!(filter.admit(1, SRC, true, false), Ok(()));
    }
}
