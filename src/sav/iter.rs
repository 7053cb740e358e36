//! Iterators for sequential access to a system file.
//!
//! 1. [`RecordIter`] - Dictionary records, header first, through the
//!    end-of-dictionary marker
//! 2. [`CaseValueIter`] - Decoded case slots in file order
//! 3. [`CaseIter`] - The same slots grouped into whole cases
//!
//! Every iterator stops after yielding its first error.
//!
//! # Example
//! ```no_run
//! # use sav_reader::SavReader;
//! let mut reader = SavReader::open("survey.sav").unwrap();
//! for record in reader.records() {
//!     println!("{:?}", record.unwrap());
//! }
//! for case in reader.case_values().cases() {
//!     println!("{} slots", case.unwrap().len());
//! }
//! ```

use std::iter::Peekable;

use super::reader::SavReader;
use super::types::error::Result;
use super::types::models::{CaseValue, Record};

/// Iterator over dictionary records.
///
/// Created by [`SavReader::records()`].
pub struct RecordIter<'a> {
    reader: &'a mut SavReader,
    failed: bool,
}

impl<'a> RecordIter<'a> {
    pub(super) fn new(reader: &'a mut SavReader) -> Self {
        Self {
            reader,
            failed: false,
        }
    }
}

impl Iterator for RecordIter<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over decoded case slots.
///
/// Created by [`SavReader::case_values()`].
pub struct CaseValueIter<'a> {
    reader: &'a mut SavReader,
    failed: bool,
}

impl<'a> CaseValueIter<'a> {
    pub(super) fn new(reader: &'a mut SavReader) -> Self {
        Self {
            reader,
            failed: false,
        }
    }

    /// Groups slots by case.
    pub fn cases(self) -> CaseIter<'a> {
        CaseIter {
            values: self.peekable(),
        }
    }
}

impl Iterator for CaseValueIter<'_> {
    type Item = Result<CaseValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.next_case_value() {
            Ok(value) => value.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Iterator over whole cases, each a `Vec` of its slots in order.
///
/// A case cut short by end-of-data opcode 252 is yielded as it stands.
///
/// Created by [`CaseValueIter::cases()`].
pub struct CaseIter<'a> {
    values: Peekable<CaseValueIter<'a>>,
}

impl Iterator for CaseIter<'_> {
    type Item = Result<Vec<CaseValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.values.next()? {
            Ok(value) => value,
            Err(e) => return Some(Err(e)),
        };
        let mut case = vec![first];
        while let Some(Ok(next)) = self.values.peek() {
            if next.case_index != first.case_index {
                break;
            }
            case.push(*next);
            self.values.next();
        }
        Some(Ok(case))
    }
}
