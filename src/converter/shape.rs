use std::convert::TryFrom;
use std::fmt;
use std::mem;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Dimension;

/// Declared input shape of a model: a non-empty list of positive extents.
/// Axis 0 is the batch axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<i64>", into = "Vec<i64>")]
pub struct InputShape(Vec<usize>);

impl InputShape {
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        if dims.is_empty() {
            return Err(Error::InvalidShape("shape must have at least one dimension".to_string()));
        }
        if let Some(pos) = dims.iter().position(|&d| d == 0) {
            return Err(Error::InvalidShape(format!("dimension {} is zero", pos)));
        }

        // The sample tensor is f32 and must stay addressable
        let addressable = dims
            .iter()
            .try_fold(mem::size_of::<f32>(), |acc, &d| acc.checked_mul(d))
            .map_or(false, |bytes| bytes <= isize::MAX as usize);
        if !addressable {
            return Err(Error::InvalidShape(format!(
                "{:?} holds too many elements for an f32 tensor",
                dims
            )));
        }

        Ok(Self(dims))
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn batch_size(&self) -> usize {
        self.0[0]
    }

    pub fn element_count(&self) -> usize {
        self.0.iter().product()
    }

    /// ONNX dimensions for this shape, with axis 0 made symbolic when a
    /// dynamic axis name is given
    pub fn to_onnx_dims(&self, dynamic_axis: Option<&str>) -> Vec<Dimension> {
        dims_with_batch_axis(&self.0, dynamic_axis)
    }
}

pub(crate) fn dims_with_batch_axis(dims: &[usize], dynamic_axis: Option<&str>) -> Vec<Dimension> {
    dims.iter()
        .enumerate()
        .map(|(axis, &d)| match dynamic_axis {
            Some(name) if axis == 0 => Dimension::Param(name.to_string()),
            _ => Dimension::Value(d as i64),
        })
        .collect()
}

impl TryFrom<Vec<i64>> for InputShape {
    type Error = Error;

    fn try_from(dims: Vec<i64>) -> Result<Self> {
        Self::try_from(dims.as_slice())
    }
}

impl TryFrom<&[i64]> for InputShape {
    type Error = Error;

    fn try_from(dims: &[i64]) -> Result<Self> {
        let dims = dims
            .iter()
            .enumerate()
            .map(|(axis, &d)| {
                if d <= 0 {
                    Err(Error::InvalidShape(format!("dimension {} must be positive, got {}", axis, d)))
                } else {
                    Ok(d as usize)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(dims)
    }
}

impl From<InputShape> for Vec<i64> {
    fn from(shape: InputShape) -> Self {
        shape.0.into_iter().map(|d| d as i64).collect()
    }
}

/// Accepts `1,3,224,224` as typed into the upload form, optionally wrapped
/// in brackets or parentheses.
impl FromStr for InputShape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s
            .trim()
            .trim_start_matches(|c| c == '(' || c == '[')
            .trim_end_matches(|c| c == ')' || c == ']');

        let dims = trimmed
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<i64>()
                    .map_err(|_| Error::InvalidShape(format!("'{}' is not an integer", part)))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::try_from(dims)
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}
