//! Placement of large intermediates: device memory when it fits the safety fraction, host pinned
//! storage filled block by block otherwise.

use crate::prelude::*;
use crate::util::vec_to_tsr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPlacement {
    Device,
    HostPinned,
}

/// Decide where a buffer of `nbytes` goes given `available` device bytes.
pub fn choose_placement(nbytes: usize, available: usize, fraction: f64) -> BufferPlacement {
    if (nbytes as f64) < fraction * available as f64 { BufferPlacement::Device } else { BufferPlacement::HostPinned }
}

/// Tensor whose first axis is accumulated in blocks of rows.
#[derive(Debug)]
pub struct StagedBuffer {
    placement: BufferPlacement,
    data: Tsr,
    transfers: usize,
}

impl StagedBuffer {
    /// Allocate on the device when the policy allows it, staging in host memory otherwise or
    /// when the device allocation fails.
    pub fn new<A: Accelerator>(accel: &A, shape: &[usize], fraction: f64) -> Self {
        let len: usize = shape.iter().product();
        let nbytes = len * std::mem::size_of::<f64>();
        let available = accel.available_memory();
        let placement = choose_placement(nbytes, available, fraction);

        let (placement, data) = match placement {
            BufferPlacement::Device => match accel.alloc_device(len) {
                Ok(data) => (BufferPlacement::Device, data),
                Err(err) => {
                    log::warn!("device allocation of {nbytes} bytes failed ({err}), staging in host memory");
                    (BufferPlacement::HostPinned, vec![0.0; len])
                },
            },
            BufferPlacement::HostPinned => {
                log::info!(
                    "buffer {shape:?} ({nbytes} bytes) exceeds {:.0}% of {available} available device bytes, staging in host memory",
                    fraction * 100.0
                );
                (BufferPlacement::HostPinned, vec![0.0; len])
            },
        };
        StagedBuffer { placement, data: vec_to_tsr(data, shape), transfers: 0 }
    }

    pub fn placement(&self) -> BufferPlacement {
        self.placement
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of block transfers received so far.
    pub fn transfers(&self) -> usize {
        self.transfers
    }

    /// Accumulate `block` into the rows starting at `row0`.
    pub fn add_rows(&mut self, row0: usize, block: &Tsr) -> GvhfResult<()> {
        let shape = self.data.shape().to_vec();
        let found = block.shape();
        let row1 = row0 + found.first().copied().unwrap_or(0);
        if found.len() != shape.len() || found[1..] != shape[1..] || row1 > shape[0] {
            let mut expected = shape.clone();
            expected[0] = shape[0].saturating_sub(row0);
            return Err(GvhfError::shape("staged block", &expected, found));
        }
        *&mut self.data.i_mut(row0..row1) += block;
        self.transfers += 1;
        Ok(())
    }

    pub fn into_tsr(self) -> Tsr {
        self.data
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_choose_placement() {
        assert_eq!(choose_placement(39, 100, 0.4), BufferPlacement::Device);
        assert_eq!(choose_placement(40, 100, 0.4), BufferPlacement::HostPinned);
        assert_eq!(choose_placement(1, 0, 0.4), BufferPlacement::HostPinned);
    }

    #[test]
    fn test_staged_buffer_fallback() {
        let small = HostAccelerator::default().with_memory(1 << 30);
        let buf = StagedBuffer::new(&small, &[4, 5, 6], 0.4);
        assert_eq!(buf.placement(), BufferPlacement::Device);

        let tiny = HostAccelerator::default().with_memory(1000);
        let mut buf = StagedBuffer::new(&tiny, &[4, 5, 6], 0.4);
        assert_eq!(buf.placement(), BufferPlacement::HostPinned);
        buf.add_rows(1, &vec_to_tsr(vec![1.0; 60], &[2, 5, 6])).unwrap();
        buf.add_rows(1, &vec_to_tsr(vec![1.0; 30], &[1, 5, 6])).unwrap();
        assert!(buf.add_rows(4, &vec_to_tsr(vec![1.0; 30], &[1, 5, 6])).is_err());
        assert!(buf.add_rows(0, &vec_to_tsr(vec![1.0; 30], &[1, 6, 5])).is_err());
        assert_eq!(buf.transfers(), 2);
        let tsr = buf.into_tsr();
        assert_eq!(tsr.shape(), &[4, 5, 6]);
        let data = crate::util::tsr_to_vec(tsr.view());
        assert_eq!(data[30], 2.0);
        assert_eq!(data[119], 0.0);
        assert_eq!(data.iter().sum::<f64>(), 90.0);
    }
}
