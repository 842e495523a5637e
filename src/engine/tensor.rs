//! Batch tensor assembly

use ndarray::{stack, Array3, Array4, ArrayView3, Axis};

use crate::error::{Error, Result};

/// Stack CHW images into a single NCHW batch
///
/// Every image must have the same shape.
pub fn stack_batch(images: &[Array3<f32>]) -> Result<Array4<f32>> {
    let Some(first) = images.first() else {
        return Err(Error::Shape("empty batch".to_string()));
    };

    if let Some(bad) = images.iter().position(|img| img.shape() != first.shape()) {
        return Err(Error::Shape(format!(
            "image {} has shape {:?}, expected {:?}",
            bad,
            images[bad].shape(),
            first.shape()
        )));
    }

    let views: Vec<ArrayView3<f32>> = images.iter().map(|img| img.view()).collect();
    stack(Axis(0), &views).map_err(|e| Error::Shape(e.to_string()))
}

/// Per-image mean over a NCHW batch
pub fn batch_means(batch: &Array4<f32>) -> Vec<f32> {
    batch
        .outer_iter()
        .map(|image| image.mean().unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_batch_shape() {
        let images = vec![
            Array3::<f32>::zeros((3, 4, 4)),
            Array3::<f32>::ones((3, 4, 4)),
            Array3::<f32>::from_elem((3, 4, 4), 0.5),
        ];

        let batch = stack_batch(&images).unwrap();
        assert_eq!(batch.shape(), &[3, 3, 4, 4]);
        assert_eq!(batch_means(&batch), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_stack_batch_rejects_mismatch() {
        let images = vec![Array3::<f32>::zeros((3, 4, 4)), Array3::<f32>::zeros((3, 2, 4))];
        let err = stack_batch(&images).unwrap_err();
        assert!(err.to_string().contains("image 1"));
    }

    #[test]
    fn test_stack_batch_rejects_empty() {
        assert!(matches!(stack_batch(&[]), Err(Error::Shape(_))));
    }
}
