//! Per-channel intensity scalers fitted on loaded volumes

use super::error::{ImageError, Result};
use ndarray::{ArrayD, ArrayViewD, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Intensity normalisation applied to an image volume before batching.
///
/// Scalers are fitted per channel on the full volume. A 3-D volume counts as
/// a single channel; in a 4-D volume the last axis indexes channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerKind {
    /// Zero mean, unit variance per channel
    #[serde(alias = "zscore")]
    Standard,
    /// Rescale each channel to the unit interval
    #[serde(alias = "min_max")]
    Minmax,
    /// Leave intensities untouched
    #[default]
    #[serde(rename = "none", alias = "noop")]
    NoOp,
}

impl FromStr for ScalerKind {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "standard" | "zscore" => Ok(ScalerKind::Standard),
            "minmax" => Ok(ScalerKind::Minmax),
            "none" | "noop" => Ok(ScalerKind::NoOp),
            _ => Err(ImageError::UnknownScaler(s.to_string())),
        }
    }
}

impl fmt::Display for ScalerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalerKind::Standard => "standard",
            ScalerKind::Minmax => "minmax",
            ScalerKind::NoOp => "none",
        };
        write!(f, "{name}")
    }
}

/// Per-channel affine transform `x' = (x - shift) / scale` produced by
/// fitting a [`ScalerKind`] on one volume
#[derive(Debug, Clone, PartialEq)]
pub struct FittedScaler {
    kind: ScalerKind,
    shift: Vec<f32>,
    scale: Vec<f32>,
}

impl FittedScaler {
    /// Fit the scaler on a volume. Channels with constant intensity get a
    /// unit scale so the transform stays finite.
    #[must_use]
    pub fn fit(kind: ScalerKind, image: &ArrayD<f32>) -> Self {
        let n_channels = channel_count(image);
        let mut shift = Vec::with_capacity(n_channels);
        let mut scale = Vec::with_capacity(n_channels);
        for c in 0..n_channels {
            let values = if n_channels > 1 {
                image.index_axis(Axis(image.ndim() - 1), c)
            } else {
                image.view()
            };
            let (sh, sc) = match kind {
                ScalerKind::Standard => {
                    let (mean, std) = mean_std(&values);
                    (mean, if std > 0.0 { std } else { 1.0 })
                }
                ScalerKind::Minmax => {
                    let (min, max) = min_max(&values);
                    let span = max - min;
                    (min, if span > 0.0 { span } else { 1.0 })
                }
                ScalerKind::NoOp => (0.0, 1.0),
            };
            shift.push(sh);
            scale.push(sc);
        }
        Self { kind, shift, scale }
    }

    #[must_use]
    pub fn kind(&self) -> ScalerKind {
        self.kind
    }

    /// Apply the fitted transform in place
    pub fn apply(&self, image: &mut ArrayD<f32>) {
        if self.kind == ScalerKind::NoOp {
            return;
        }
        let n_channels = self.shift.len();
        if n_channels > 1 && image.ndim() >= 4 {
            let last = image.ndim() - 1;
            for c in 0..n_channels {
                let shift = self.shift[c];
                let scale = self.scale[c];
                image
                    .index_axis_mut(Axis(last), c)
                    .mapv_inplace(|v| (v - shift) / scale);
            }
        } else {
            let shift = self.shift[0];
            let scale = self.scale[0];
            image.mapv_inplace(|v| (v - shift) / scale);
        }
    }
}

fn channel_count(image: &ArrayD<f32>) -> usize {
    if image.ndim() >= 4 {
        image.shape()[image.ndim() - 1]
    } else {
        1
    }
}

fn mean_std(values: &ArrayViewD<'_, f32>) -> (f32, f32) {
    let n = values.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = f64::from(v) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean as f32, var.sqrt() as f32)
}

fn min_max(values: &ArrayViewD<'_, f32>) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() {
        (min, max)
    } else {
        (0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn ramp_volume() -> ArrayD<f32> {
        Array3::from_shape_fn((4, 4, 4), |(i, j, k)| (i * 16 + j * 4 + k) as f32).into_dyn()
    }

    #[test]
    fn test_scaler_kind_from_str() {
        assert_eq!("standard".parse::<ScalerKind>().unwrap(), ScalerKind::Standard);
        assert_eq!("Z-Score".parse::<ScalerKind>().unwrap(), ScalerKind::Standard);
        assert_eq!("min_max".parse::<ScalerKind>().unwrap(), ScalerKind::Minmax);
        assert_eq!("none".parse::<ScalerKind>().unwrap(), ScalerKind::NoOp);
        assert!("robust".parse::<ScalerKind>().is_err());
    }

    #[test]
    fn test_standard_scaler_centres_data() {
        let mut vol = ramp_volume();
        let scaler = FittedScaler::fit(ScalerKind::Standard, &vol);
        scaler.apply(&mut vol);
        let mean: f32 = vol.iter().sum::<f32>() / vol.len() as f32;
        let var: f32 = vol.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / vol.len() as f32;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
        assert_relative_eq!(var.sqrt(), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_minmax_scaler_hits_unit_interval() {
        let mut vol = ramp_volume();
        let scaler = FittedScaler::fit(ScalerKind::Minmax, &vol);
        scaler.apply(&mut vol);
        let min = vol.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = vol.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert_relative_eq!(min, 0.0);
        assert_relative_eq!(max, 1.0);
    }

    #[test]
    fn test_noop_scaler_leaves_data_alone() {
        let mut vol = ramp_volume();
        let original = vol.clone();
        FittedScaler::fit(ScalerKind::NoOp, &vol).apply(&mut vol);
        assert_eq!(vol, original);
    }

    #[test]
    fn test_constant_channel_stays_finite() {
        let mut vol = ArrayD::from_elem(vec![3, 3, 3], 7.0f32);
        FittedScaler::fit(ScalerKind::Standard, &vol.clone()).apply(&mut vol);
        assert!(vol.iter().all(|v| v.is_finite()));
        FittedScaler::fit(ScalerKind::Minmax, &vol.clone()).apply(&mut vol);
        assert!(vol.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_multi_channel_fit_is_independent() {
        // channel 0 constant at 10, channel 1 a ramp
        let vol = ArrayD::from_shape_fn(vec![2, 2, 2, 2], |idx| {
            if idx[3] == 0 {
                10.0
            } else {
                (idx[0] * 4 + idx[1] * 2 + idx[2]) as f32
            }
        });
        let scaler = FittedScaler::fit(ScalerKind::Minmax, &vol);
        let mut scaled = vol.clone();
        scaler.apply(&mut scaled);
        // constant channel collapses to its shift
        assert!(scaled
            .index_axis(Axis(3), 0)
            .iter()
            .all(|&v| v == 0.0));
        let ch1_max = scaled
            .index_axis(Axis(3), 1)
            .iter()
            .cloned()
            .fold(f32::NEG_INFINITY, f32::max);
        assert_relative_eq!(ch1_max, 1.0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_minmax_output_within_unit_interval(
                values in prop::collection::vec(-1000.0f32..1000.0, 8..64)
            ) {
                let len = values.len();
                let mut vol = ArrayD::from_shape_vec(vec![len], values).unwrap();
                FittedScaler::fit(ScalerKind::Minmax, &vol.clone()).apply(&mut vol);
                for &v in &vol {
                    prop_assert!((-1e-4..=1.0 + 1e-4).contains(&v));
                }
            }

            #[test]
            fn test_standard_output_finite(
                values in prop::collection::vec(-1e6f32..1e6, 8..64)
            ) {
                let len = values.len();
                let mut vol = ArrayD::from_shape_vec(vec![len], values).unwrap();
                FittedScaler::fit(ScalerKind::Standard, &vol.clone()).apply(&mut vol);
                prop_assert!(vol.iter().all(|v| v.is_finite()));
            }
        }
    }
}
