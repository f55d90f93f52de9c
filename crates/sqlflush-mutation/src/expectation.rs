//! Row-count expectations.
//!
//! An [`Expectation`] checks the affected-row count a statement reports
//! against what the mutation requires. Violations are reported as
//! [`Error::StaleState`], never as driver errors.

use sqlflush_core::{Error, Result, StaleStateError, Statement};

/// Row-count validation policy for one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Any row count is accepted
    None,
    /// Exactly this many rows must be affected
    RowCount(u64),
    /// Zero or one row may be affected
    OptionalRowCount,
    /// The row count is read from out-parameter 1 of a callable statement
    OutParameter,
}

impl Expectation {
    /// The usual expectation for single-row inserts, updates and deletes.
    pub const fn one_row() -> Self {
        Expectation::RowCount(1)
    }

    /// Number of leading parameter positions the expectation reserves.
    pub const fn parameter_offset(self) -> usize {
        match self {
            Expectation::OutParameter => 1,
            _ => 0,
        }
    }

    /// Whether statements with this expectation may be executed in a batch.
    pub const fn can_be_batched(self) -> bool {
        !matches!(self, Expectation::OutParameter)
    }

    /// Prepare a statement before parameters are bound.
    pub fn prepare(self, statement: &mut dyn Statement) -> Result<()> {
        if let Expectation::OutParameter = self {
            if !statement.is_callable() {
                return Err(Error::illegal_state(format!(
                    "out-parameter expectation requires a callable statement: {}",
                    statement.sql()
                )));
            }
            statement.register_out_parameter(1)?;
        }
        Ok(())
    }

    /// The affected-row count, given what `execute_update` returned.
    pub fn affected_rows(self, statement: &dyn Statement, update_count: u64) -> Result<u64> {
        match self {
            Expectation::OutParameter => {
                let value = statement.out_parameter(1)?;
                value
                    .as_i64()
                    .and_then(|n| u64::try_from(n).ok())
                    .ok_or_else(|| {
                        Error::illegal_state(format!(
                            "out parameter 1 is not a row count: {value}"
                        ))
                    })
            }
            _ => Ok(update_count),
        }
    }

    /// Verify an affected-row count.
    pub fn verify_outcome(
        self,
        actual: u64,
        table: &str,
        sql: &str,
        batch_position: Option<usize>,
    ) -> Result<()> {
        let expected = match self {
            Expectation::None => return Ok(()),
            Expectation::RowCount(n) if actual == n => return Ok(()),
            Expectation::RowCount(n) => n,
            Expectation::OptionalRowCount if actual <= 1 => return Ok(()),
            Expectation::OutParameter if actual == 1 => return Ok(()),
            Expectation::OptionalRowCount | Expectation::OutParameter => 1,
        };

        tracing::debug!(
            table = table,
            expected = expected,
            actual = actual,
            batch_position = ?batch_position,
            "Row count expectation failed"
        );
        Err(Error::StaleState(StaleStateError {
            table: table.to_string(),
            sql: sql.to_string(),
            expected,
            actual,
            batch_position,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_row_count() {
        let e = Expectation::one_row();
        assert!(e.verify_outcome(1, "t", "UPDATE t", None).is_ok());

        let err = e.verify_outcome(0, "t", "UPDATE t", Some(3)).unwrap_err();
        match err {
            Error::StaleState(s) => {
                assert_eq!(s.expected, 1);
                assert_eq!(s.actual, 0);
                assert_eq!(s.batch_position, Some(3));
                assert_eq!(s.table, "t");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn optional_accepts_zero_or_one() {
        let e = Expectation::OptionalRowCount;
        assert!(e.verify_outcome(0, "t", "", None).is_ok());
        assert!(e.verify_outcome(1, "t", "", None).is_ok());
        assert!(e.verify_outcome(2, "t", "", None).unwrap_err().is_stale_state());
    }

    #[test]
    fn none_accepts_anything() {
        assert!(Expectation::None.verify_outcome(42, "t", "", None).is_ok());
    }

    #[test]
    fn out_parameter_is_not_batchable() {
        assert!(!Expectation::OutParameter.can_be_batched());
        assert_eq!(Expectation::OutParameter.parameter_offset(), 1);
        assert!(Expectation::one_row().can_be_batched());
        assert_eq!(Expectation::one_row().parameter_offset(), 0);
    }
}
