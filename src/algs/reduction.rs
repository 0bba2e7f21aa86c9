//! All-worker reductions of small vectors.
//!
//! Contributions are gathered to every worker and combined in rank order, so
//! each worker computes the identical result.

use crate::algs::communicator::Communicator;
use crate::algs::wire::{cast_slice, decode_vec};
use crate::data::distributed_array::Element;
use crate::grid_error::GridError;

/// Combining operator for [`global_reduce`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    #[inline]
    pub fn combine<T: Element>(self, acc: T, v: T) -> T {
        match self {
            ReduceOp::Sum => acc + v,
            ReduceOp::Max => {
                if v > acc {
                    v
                } else {
                    acc
                }
            }
            ReduceOp::Min => {
                if v < acc {
                    v
                } else {
                    acc
                }
            }
        }
    }
}

/// Reduce `values` element-wise across all workers, in place.
///
/// Every worker must pass a slice of the same length.
pub fn global_reduce<T, C>(comm: &C, values: &mut [T], op: ReduceOp) -> Result<(), GridError>
where
    T: Element,
    C: Communicator,
{
    let gathered = comm.all_gather(cast_slice(values))?;
    let mut parts = Vec::with_capacity(gathered.len());
    for (rank, bytes) in gathered.iter().enumerate() {
        let part = decode_vec::<T>("global_reduce", bytes)?;
        if part.len() != values.len() {
            return Err(GridError::CollectiveMismatch(format!(
                "global_reduce: worker {rank} contributed {} values, expected {}",
                part.len(),
                values.len()
            )));
        }
        parts.push(part);
    }
    let Some((first, rest)) = parts.split_first() else {
        return Ok(());
    };
    values.copy_from_slice(first);
    for part in rest {
        for (acc, &v) in values.iter_mut().zip(part) {
            *acc = op.combine(*acc, v);
        }
    }
    Ok(())
}

/// Sum of one scalar over all workers.
pub fn global_sum<T: Element, C: Communicator>(comm: &C, value: T) -> Result<T, GridError> {
    let mut v = [value];
    global_reduce(comm, &mut v, ReduceOp::Sum)?;
    Ok(v[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, WorkerGroup};

    #[test]
    fn serial_reduce_is_identity() {
        let mut v = [1.5f64, -2.0];
        global_reduce(&NoComm, &mut v, ReduceOp::Max).unwrap();
        assert_eq!(v, [1.5, -2.0]);
    }

    #[test]
    fn sum_max_min_over_workers() {
        let out = WorkerGroup::run(4, |comm| {
            let r = comm.rank() as i32;
            let mut s = [r, 1];
            global_reduce(comm, &mut s, ReduceOp::Sum).unwrap();
            let mut hi = [r * 10];
            global_reduce(comm, &mut hi, ReduceOp::Max).unwrap();
            let mut lo = [r - 5];
            global_reduce(comm, &mut lo, ReduceOp::Min).unwrap();
            (s, hi[0], lo[0])
        })
        .unwrap();
        for (s, hi, lo) in out {
            assert_eq!(s, [6, 4]);
            assert_eq!(hi, 30);
            assert_eq!(lo, -5);
        }
    }

    #[test]
    fn length_mismatch_is_collective_error() {
        let out = WorkerGroup::run(2, |comm| {
            let mut v = vec![1u8; comm.rank() + 1];
            global_reduce(comm, &mut v, ReduceOp::Sum)
        })
        .unwrap();
        assert!(out.iter().all(|r| matches!(r, Err(GridError::CollectiveMismatch(_)))));
    }
}
