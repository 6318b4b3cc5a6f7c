use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayView4};

use crate::decoder::RawImage;
use crate::error::TensorError;

pub const INPUT_HEIGHT: usize = 128;
pub const INPUT_WIDTH: usize = 128;
pub const INPUT_CHANNELS: usize = 3;

/// NHWC input shape with the single-example batch axis.
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS];

/// Model-ready input: `f32[1, 128, 128, 3]`, RGB, every element in `[0, 1]`.
///
/// Only [`Preprocessor::normalize`] and the checked [`ImageTensor::from_array`]
/// produce values of this type.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor(Array4<f32>);

impl ImageTensor {
    pub fn from_array(array: Array4<f32>) -> Result<Self, TensorError> {
        if array.shape() != &INPUT_SHAPE[..] {
            return Err(TensorError::Shape {
                expected: INPUT_SHAPE.to_vec(),
                actual: array.shape().to_vec(),
            });
        }
        if let Some(value) = array.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(TensorError::Range(*value));
        }
        Ok(Self(array))
    }

    pub fn shape(&self) -> &[usize] {
        self.0.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.0.view()
    }

    /// Elements in row-major NHWC order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.0.iter().copied().collect()
    }
}

/// Resizes and scales decoded images into [`ImageTensor`]s.
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    filter: FilterType,
}

/// Bicubic, matching Pillow's default `Image.resize`.
impl Default for Preprocessor {
    fn default() -> Self {
        Self::new(FilterType::CatmullRom)
    }
}

impl Preprocessor {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> FilterType {
        self.filter
    }

    /// Total for any decoded image: converts to 8-bit RGB (alpha dropped),
    /// resizes to 128x128 ignoring aspect ratio, then divides by 255.
    pub fn normalize(&self, raw: &RawImage) -> ImageTensor {
        let rgb = raw.image.to_rgb8();
        let resized = imageops::resize(
            &rgb,
            INPUT_WIDTH as u32,
            INPUT_HEIGHT as u32,
            self.filter,
        );

        let array = Array4::from_shape_fn(INPUT_SHAPE, |(_, y, x, c)| {
            resized[(x as u32, y as u32)][c] as f32 / 255.0
        });
        ImageTensor(array)
    }
}
