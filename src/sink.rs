use std::io::{BufWriter, Write};

use crate::error::MineError;

/// Receives each qualifying itemset exactly once. The search guarantees
/// single emission, so sinks neither deduplicate nor promise any ordering.
pub(crate) trait PatternSink {
    fn accept(&mut self, items: &[i64], utility: i64) -> Result<(), MineError>;
}

/// In-memory collection of `(utility, items)` pairs.
#[derive(Default)]
pub(crate) struct PatternCollector {
    pub patterns: Vec<(i64, Vec<i64>)>,
}

impl PatternSink for PatternCollector {
    fn accept(&mut self, items: &[i64], utility: i64) -> Result<(), MineError> {
        self.patterns.push((utility, items.to_vec()));
        Ok(())
    }
}

/// Streams one `<item ids separated by spaces> #UTIL: <utility>` line per
/// pattern to a buffered writer.
pub(crate) struct LineSink<W: Write> {
    writer: BufWriter<W>,
    written: usize,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        LineSink {
            writer: BufWriter::new(writer),
            written: 0,
        }
    }

    pub fn finish(mut self) -> Result<usize, MineError> {
        self.writer.flush()?;
        Ok(self.written)
    }
}

impl<W: Write> PatternSink for LineSink<W> {
    fn accept(&mut self, items: &[i64], utility: i64) -> Result<(), MineError> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(self.writer, " ")?;
            }
            write!(self.writer, "{}", item)?;
        }
        writeln!(self.writer, " #UTIL: {}", utility)?;
        self.written += 1;
        Ok(())
    }
}

/// Flatten mined patterns into parallel arrays for the numpy surface:
/// utilities, CSR-style offsets, and the concatenated item ids.
pub(crate) fn flatten_patterns(patterns: Vec<(i64, Vec<i64>)>) -> (Vec<i64>, Vec<u32>, Vec<i64>) {
    let mut utilities = Vec::with_capacity(patterns.len());
    let mut offsets = Vec::with_capacity(patterns.len() + 1);

    let total_items: usize = patterns.iter().map(|(_, items)| items.len()).sum();
    let mut all_items = Vec::with_capacity(total_items);

    offsets.push(0);
    for (utility, mut items) in patterns {
        utilities.push(utility);
        all_items.append(&mut items);
        offsets.push(all_items.len() as u32);
    }

    (utilities, offsets, all_items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_sink_writes_one_line_per_pattern() {
        let mut buf = Vec::new();
        {
            let mut sink = LineSink::new(&mut buf);
            sink.accept(&[4, 7, 2], 31).unwrap();
            sink.accept(&[9], 5).unwrap();
            assert_eq!(sink.finish().unwrap(), 2);
        }
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "4 7 2 #UTIL: 31\n9 #UTIL: 5\n"
        );
    }

    #[test]
    fn flatten_preserves_pattern_boundaries() {
        let (utilities, offsets, items) = flatten_patterns(vec![
            (10, vec![1, 2]),
            (3, vec![7]),
            (8, vec![4, 5, 6]),
        ]);
        assert_eq!(utilities, vec![10, 3, 8]);
        assert_eq!(offsets, vec![0, 2, 3, 6]);
        assert_eq!(items, vec![1, 2, 7, 4, 5, 6]);
    }
}
