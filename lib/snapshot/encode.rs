//! Rows to bytes.
//!
//! Every field is written as its text value followed by `;`, and every row ends with `\n`.
//! Separators inside values are not escaped, so a value containing `;` or a newline cannot be told
//! apart from a field or row boundary when reading the file back. SQL `NULL` is written as an
//! empty field.

use bytes::{BufMut as _, Bytes, BytesMut};

const FIELD_SEPARATOR: u8 = b';';
const ROW_SEPARATOR: u8 = b'\n';

/// Accumulates rows into a table's file content.
#[derive(Debug, Default)]
pub struct RowEncoder {
    buf: BytesMut,
    rows: u64,
}

impl RowEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one row.
    pub fn push_row<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<[u8]>,
    {
        for field in fields {
            if let Some(value) = field {
                self.buf.put_slice(value.as_ref());
            }
            self.buf.put_u8(FIELD_SEPARATOR);
        }
        self.buf.put_u8(ROW_SEPARATOR);
        self.rows += 1;
    }

    /// Rows written so far.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows
    }

    /// Returns the row count and the encoded content.
    #[must_use]
    pub fn finish(self) -> (u64, Bytes) {
        (self.rows, self.buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_and_rows_are_terminated() {
        let mut enc = RowEncoder::new();
        enc.push_row([Some("1"), Some("alice")]);
        enc.push_row([Some("2"), Some("bob")]);
        let (rows, content) = enc.finish();
        assert_eq!(rows, 2);
        assert_eq!(content.as_ref(), b"1;alice;\n2;bob;\n");
    }

    #[test]
    fn null_is_an_empty_field() {
        let mut enc = RowEncoder::new();
        enc.push_row([Some("1"), None, Some("x")]);
        assert_eq!(enc.finish().1.as_ref(), b"1;;x;\n");
    }

    #[test]
    fn separators_inside_values_are_not_escaped() {
        let mut enc = RowEncoder::new();
        enc.push_row([Some("a;b"), Some("line\nbreak")]);
        let (rows, content) = enc.finish();
        assert_eq!(rows, 1);
        assert_eq!(content.as_ref(), b"a;b;line\nbreak;\n");
        // Read back naively, the single row looks like two rows with three fields.
        assert_eq!(content.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count(), 2);
    }

    #[test]
    fn zero_column_row_is_just_a_newline() {
        let mut enc = RowEncoder::new();
        enc.push_row(std::iter::empty::<Option<&str>>());
        assert_eq!(enc.finish(), (1, Bytes::from_static(b"\n")));
    }
}
