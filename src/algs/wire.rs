//! Fixed little-endian wire records for collective exchanges.
//!
//! Gathered buffers arrive as [`Bytes`](bytes::Bytes) with no alignment
//! guarantee, so decoding always copies into a properly aligned `Vec<T>`.

use bytemuck::{Pod, Zeroable};

use crate::data::distributed_array::Region;
use crate::grid_error::GridError;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn expect_exact_len(what: &str, actual: usize, expected: usize) -> Result<(), GridError> {
    if actual == expected {
        Ok(())
    } else {
        Err(GridError::CollectiveMismatch(format!(
            "{what}: expected {expected} bytes, got {actual}"
        )))
    }
}

/// Copy a possibly unaligned byte buffer into a typed vector.
pub fn decode_vec<T: Pod>(what: &str, bytes: &[u8]) -> Result<Vec<T>, GridError> {
    let width = std::mem::size_of::<T>();
    if width == 0 || bytes.len() % width != 0 {
        return Err(GridError::CollectiveMismatch(format!(
            "{what}: {} bytes is not a whole number of {width}-byte values",
            bytes.len()
        )));
    }
    let mut out = vec![T::zeroed(); bytes.len() / width];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}

/// Owned rectangle of one worker, as exchanged when summarizing a layout.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireRegion {
    pub row_start_le: u64,
    pub row_end_le: u64,
    pub col_start_le: u64,
    pub col_end_le: u64,
    pub cells_le: u64,
}

impl WireRegion {
    pub fn new(region: &Region, cells: usize) -> Self {
        Self {
            row_start_le: (region.rows.start as u64).to_le(),
            row_end_le: (region.rows.end as u64).to_le(),
            col_start_le: (region.cols.start as u64).to_le(),
            col_end_le: (region.cols.end as u64).to_le(),
            cells_le: (cells as u64).to_le(),
        }
    }

    pub fn region(&self) -> Region {
        Region::new(
            u64::from_le(self.row_start_le) as usize..u64::from_le(self.row_end_le) as usize,
            u64::from_le(self.col_start_le) as usize..u64::from_le(self.col_end_le) as usize,
        )
    }

    pub fn cells(&self) -> usize {
        u64::from_le(self.cells_le) as usize
    }
}

static_assertions::const_assert_eq!(std::mem::size_of::<WireRegion>(), 40);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_ragged_buffers() {
        assert!(decode_vec::<f64>("probe", &[0u8; 12]).is_err());
        let v = decode_vec::<u32>("probe", cast_slice(&[7u32, 9])).unwrap();
        assert_eq!(v, vec![7, 9]);
    }

    #[test]
    fn region_record_survives_unaligned_storage() {
        let rec = WireRegion::new(&Region::new(2..5, 0..7), 11);
        let mut raw = vec![0u8; 1];
        raw.extend_from_slice(cast_slice(std::slice::from_ref(&rec)));
        let back = decode_vec::<WireRegion>("region", &raw[1..]).unwrap();
        assert_eq!(back[0].region(), Region::new(2..5, 0..7));
        assert_eq!(back[0].cells(), 11);
    }
}
