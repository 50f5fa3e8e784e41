//! Accelerator lane assignment
//!
//! Samples are split into contiguous, order-preserving chunks, one per lane,
//! and every chunk gets its own disjoint slice of the accelerator devices.
//! The assignment is a pure function of its inputs so re-runs over the same
//! input directory bind the same samples to the same devices.

use anyhow::{Result, bail};
use std::collections::BTreeMap;

use crate::models::AcceleratorBinding;

/// Split `items` into `chunks` contiguous groups whose sizes differ by at most one.
///
/// The first `len % chunks` groups carry the extra item, so a later group is
/// never larger than an earlier one. Groups may be empty when there are fewer
/// items than chunks.
pub fn chunk_evenly<T: Clone>(items: &[T], chunks: usize) -> Vec<Vec<T>> {
    if chunks == 0 {
        return Vec::new();
    }
    let base = items.len() / chunks;
    let extra = items.len() % chunks;

    let mut result = Vec::with_capacity(chunks);
    let mut start = 0;
    for i in 0..chunks {
        let size = base + usize::from(i < extra);
        result.push(items[start..start + size].to_vec());
        start += size;
    }
    result
}

/// Device slices for each lane, e.g. `cuda:0` and `cuda:1` for two lanes
/// over two devices.
pub fn device_slices(devices: &[String], lanes: usize) -> Result<Vec<AcceleratorBinding>> {
    if lanes == 0 {
        bail!("lane count must be at least 1");
    }
    if devices.len() < lanes {
        bail!(
            "{} accelerator devices cannot be split into {} lanes",
            devices.len(),
            lanes
        );
    }
    Ok(chunk_evenly(devices, lanes)
        .into_iter()
        .map(|slice| AcceleratorBinding {
            token: format!("cuda:{}", slice.join(",")),
            count: slice.len(),
        })
        .collect())
}

/// Map every sample name to the accelerator slice of its lane.
pub fn assign_lanes(
    samples: &[String],
    devices: &[String],
    lanes: usize,
) -> Result<BTreeMap<String, AcceleratorBinding>> {
    let slices = device_slices(devices, lanes)?;
    let mut assignment = BTreeMap::new();
    for (chunk, slice) in chunk_evenly(samples, lanes).into_iter().zip(slices) {
        for sample in chunk {
            assignment.insert(sample, slice.clone());
        }
    }
    Ok(assignment)
}
