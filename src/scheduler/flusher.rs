//! Stage-ordered output.
//!
//! Parallel-group members finish in any order; their buffered output is
//! released strictly in ascending stage id so the combined output is identical
//! whatever the worker count.

use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Write};

use crate::stage::StageId;

pub struct OrderedFlusher<W: Write> {
    expected: VecDeque<StageId>,
    pending: BTreeMap<StageId, Vec<String>>,
    out: W,
}

impl<W: Write> OrderedFlusher<W> {
    /// `expected` lists the stages whose output will be submitted, in any order.
    pub fn new(expected: impl IntoIterator<Item = StageId>, out: W) -> Self {
        let mut expected: Vec<StageId> = expected.into_iter().collect();
        expected.sort();
        expected.dedup();
        Self {
            expected: expected.into(),
            pending: BTreeMap::new(),
            out,
        }
    }

    /// Buffer `lines` for `stage` and write every block that is now next in order.
    pub fn submit(&mut self, stage: StageId, lines: Vec<String>) -> io::Result<()> {
        self.pending.insert(stage, lines);
        while let Some(next) = self.expected.front().copied() {
            let Some(lines) = self.pending.remove(&next) else {
                break;
            };
            self.write_block(&lines)?;
            self.expected.pop_front();
        }
        self.out.flush()
    }

    /// Write whatever is still buffered, in stage order.
    pub fn finish(mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for lines in pending.into_values() {
            self.write_block(&lines)?;
        }
        self.out.flush()
    }

    fn write_block(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &str) -> Vec<String> {
        vec![s.to_string()]
    }

    #[test]
    fn test_out_of_order_submissions_are_written_in_stage_order() {
        let mut buf = Vec::new();
        {
            let mut flusher = OrderedFlusher::new(
                [StageId::TEST_PLAN, StageId::SPEC, StageId::TASKS],
                &mut buf,
            );
            flusher.submit(StageId::TEST_PLAN, lines("c")).unwrap();
            flusher.submit(StageId::TASKS, lines("b")).unwrap();
            flusher.submit(StageId::SPEC, lines("a")).unwrap();
            flusher.finish().unwrap();
        }
        assert_eq!(String::from_utf8(buf).unwrap(), "a\nb\nc\n");
    }

    #[test]
    fn test_blocks_are_released_as_soon_as_prefix_completes() {
        let mut buf = Vec::new();
        let mut flusher = OrderedFlusher::new([StageId::SPEC, StageId::TASKS], &mut buf);
        flusher.submit(StageId::TASKS, lines("b")).unwrap();
        flusher.submit(StageId::SPEC, lines("a")).unwrap();
        drop(flusher);
        assert_eq!(String::from_utf8(buf).unwrap(), "a\nb\n");
    }

    #[test]
    fn test_finish_writes_blocks_behind_a_gap() {
        let mut buf = Vec::new();
        let mut flusher = OrderedFlusher::new([StageId::SPEC, StageId::TASKS], &mut buf);
        flusher.submit(StageId::TASKS, lines("b")).unwrap();
        flusher.finish().unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "b\n");
    }
}
