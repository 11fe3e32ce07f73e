//! Partition the rewritten statement sequence into ordered batches.

use crate::error::{Result, StagerError};
use crate::rewriter::RewrittenStatement;

pub const DEFAULT_BATCH_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based
    pub index: usize,
    pub statements: Vec<RewrittenStatement>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Output file name for this batch.
    pub fn file_name(&self) -> String {
        part_file_name(self.index)
    }
}

pub fn part_file_name(index: usize) -> String {
    format!("part_{}.sql", index)
}

/// Number of statements each batch receives.
///
/// Batches `1..n` get `max(1, total / n)` each until the sequence runs out,
/// batch `n` gets whatever remains.
pub fn batch_sizes(total: usize, n: usize) -> Result<Vec<usize>> {
    if n == 0 {
        return Err(StagerError::InvalidBatchCount);
    }

    let base = (total / n).max(1);
    let mut remaining = total;
    let mut sizes = Vec::with_capacity(n);
    for _ in 1..n {
        let size = base.min(remaining);
        sizes.push(size);
        remaining -= size;
    }
    sizes.push(remaining);
    Ok(sizes)
}

/// Split `statements` into exactly `n` contiguous batches, in order.
pub fn partition(statements: Vec<RewrittenStatement>, n: usize) -> Result<Vec<Batch>> {
    let sizes = batch_sizes(statements.len(), n)?;
    let mut iter = statements.into_iter();

    let batches: Vec<Batch> = sizes
        .into_iter()
        .enumerate()
        .map(|(i, size)| Batch {
            index: i + 1,
            statements: iter.by_ref().take(size).collect(),
        })
        .collect();

    tracing::debug!(
        batches = batches.len(),
        sizes = ?batches.iter().map(Batch::len).collect::<Vec<_>>(),
        "partitioned statements"
    );
    Ok(batches)
}
