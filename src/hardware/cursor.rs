//! First/next enumeration as an iterator.
//!
//! The vendor SDK enumerates devices, gain options and ADC options with a cursor: a
//! `first` call that restarts the enumeration and `next` calls until a sentinel. [`Cursor`]
//! turns such a pair into a finite, fused iterator. Restarting is just building a new
//! `Cursor`, which issues `first` again.

use anyhow::Result;
use std::iter::FusedIterator;

/// Which cursor call to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    /// Restart the enumeration.
    First,
    /// Advance the enumeration.
    Next,
}

/// Iterator over a first/next cursor.
///
/// `fetch` returns `Ok(None)` at the end. An error is yielded once and ends iteration.
pub struct Cursor<F> {
    fetch: F,
    started: bool,
    finished: bool,
}

impl<F> Cursor<F> {
    /// Wrap a fetch function.
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            started: false,
            finished: false,
        }
    }
}

impl<T, F> Iterator for Cursor<F>
where
    F: FnMut(CursorStep) -> Result<Option<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let step = if self.started {
            CursorStep::Next
        } else {
            CursorStep::First
        };
        self.started = true;

        match (self.fetch)(step) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<T, F> FusedIterator for Cursor<F> where F: FnMut(CursorStep) -> Result<Option<T>> {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn source(items: &'static [u32]) -> impl FnMut(CursorStep) -> Result<Option<u32>> {
        let mut pos = 0;
        move |step| {
            if step == CursorStep::First {
                pos = 0;
            }
            let item = items.get(pos).copied();
            pos += 1;
            Ok(item)
        }
    }

    #[test]
    fn yields_first_then_next_until_exhausted() {
        let items: Vec<u32> = Cursor::new(source(&[3, 1, 4])).map(|r| r.unwrap()).collect();
        assert_eq!(items, vec![3, 1, 4]);
    }

    #[test]
    fn empty_source_yields_nothing() {
        assert_eq!(Cursor::new(source(&[])).count(), 0);
    }

    #[test]
    fn stays_exhausted() {
        let mut cursor = Cursor::new(source(&[7]));
        assert_eq!(cursor.next().unwrap().unwrap(), 7);
        assert!(cursor.next().is_none());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn error_ends_iteration() {
        let mut calls = 0;
        let mut cursor = Cursor::new(|_step: CursorStep| -> Result<Option<u32>> {
            calls += 1;
            if calls == 2 {
                Err(anyhow!("enumeration failed"))
            } else {
                Ok(Some(calls))
            }
        });
        assert_eq!(cursor.next().unwrap().unwrap(), 1);
        assert!(cursor.next().unwrap().is_err());
        assert!(cursor.next().is_none());
    }
}
