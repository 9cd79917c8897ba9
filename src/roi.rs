//! Regions of interest and block tiling.
//!
//! A [`Roi`] is a half-open box `[start, stop)` in the addressable space of an
//! output slot. A zero-dimensional roi addresses the whole slot; it is what
//! [`Slot::set_dirty_all`](crate::slot::Slot::set_dirty_all) sends when the
//! shape is unknown.

use crate::error::{EngineError, Result};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Slice};
use serde::{Deserialize, Serialize};

/// Half-open n-dimensional box.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Roi {
    pub start: Vec<usize>,
    pub stop: Vec<usize>,
}

impl Roi {
    pub fn new(start: impl Into<Vec<usize>>, stop: impl Into<Vec<usize>>) -> Self {
        Self {
            start: start.into(),
            stop: stop.into(),
        }
    }

    /// Roi covering an entire array of the given shape.
    pub fn full(shape: &[usize]) -> Self {
        Self {
            start: vec![0; shape.len()],
            stop: shape.to_vec(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    /// True for the zero-dimensional "everything" roi.
    pub fn is_everything(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty()
    }

    /// Extent along each axis.
    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(a, b)| b.saturating_sub(*a))
            .collect()
    }

    /// Number of elements covered.
    pub fn volume(&self) -> usize {
        self.shape().iter().product()
    }

    /// Check that the roi is well-formed and lies within `shape`.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        let ok = self.start.len() == shape.len()
            && self.stop.len() == shape.len()
            && self
                .start
                .iter()
                .zip(&self.stop)
                .zip(shape)
                .all(|((a, b), s)| a <= b && b <= s);
        if ok {
            Ok(())
        } else {
            Err(EngineError::InvalidRoi {
                roi: self.clone(),
                shape: shape.to_vec(),
            })
        }
    }

    /// View of the region of `array` covered by this roi.
    pub fn slice<'a>(&self, array: &'a ArrayD<f64>) -> Result<ArrayViewD<'a, f64>> {
        self.validate(array.shape())?;
        Ok(array.slice_each_axis(|ax| {
            let i = ax.axis.index();
            Slice::from(self.start[i]..self.stop[i])
        }))
    }

    /// Mutable view of the region of `array` covered by this roi.
    pub fn slice_mut<'a>(&self, array: &'a mut ArrayD<f64>) -> Result<ArrayViewMutD<'a, f64>> {
        self.validate(array.shape())?;
        Ok(array.slice_each_axis_mut(|ax| {
            let i = ax.axis.index();
            Slice::from(self.start[i]..self.stop[i])
        }))
    }

    /// Copy `data` into the region of `array` covered by this roi.
    pub fn assign(&self, array: &mut ArrayD<f64>, data: &ArrayD<f64>) -> Result<()> {
        let mut view = self.slice_mut(array)?;
        if view.shape() != data.shape() {
            return Err(EngineError::InvalidRoi {
                roi: self.clone(),
                shape: data.shape().to_vec(),
            });
        }
        view.assign(data);
        Ok(())
    }
}

/// Start coordinates of every block of `block_shape` that intersects `roi`.
pub fn intersecting_blocks(block_shape: &[usize], roi: &Roi) -> Vec<Vec<usize>> {
    if block_shape.iter().any(|&b| b == 0) || roi.volume() == 0 {
        return Vec::new();
    }

    let ranges: Vec<Vec<usize>> = block_shape
        .iter()
        .zip(roi.start.iter().zip(&roi.stop))
        .map(|(&b, (&start, &stop))| {
            let first = (start / b) * b;
            (first..stop).step_by(b).collect()
        })
        .collect();

    // Cartesian product, last axis fastest
    let mut starts: Vec<Vec<usize>> = vec![Vec::new()];
    for axis in ranges {
        let mut next = Vec::with_capacity(starts.len() * axis.len());
        for prefix in &starts {
            for &coord in &axis {
                let mut s = prefix.clone();
                s.push(coord);
                next.push(s);
            }
        }
        starts = next;
    }
    starts
}

/// Bounds of the block starting at `block_start`, clipped to `shape`.
pub fn block_bounds(shape: &[usize], block_shape: &[usize], block_start: &[usize]) -> Roi {
    let stop = block_start
        .iter()
        .zip(block_shape)
        .zip(shape)
        .map(|((&s, &b), &max)| (s + b).min(max))
        .collect::<Vec<_>>();
    Roi::new(block_start.to_vec(), stop)
}

/// Tile `shape` into blocks and return one roi per block.
pub fn tile(shape: &[usize], block_shape: &[usize]) -> Vec<Roi> {
    intersecting_blocks(block_shape, &Roi::full(shape))
        .iter()
        .map(|start| block_bounds(shape, block_shape, start))
        .collect()
}
