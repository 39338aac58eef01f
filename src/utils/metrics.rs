//! Segmentation metrics
//!
//! Per-image Intersection-over-Union built from a per-class pixel overlap
//! table. The batch helper [`get_iou`] returns the IoU summed over the images
//! of a batch; callers divide by an image count to obtain mIoU.

use burn::tensor::{backend::Backend, Int, Tensor};
use serde::{Deserialize, Serialize};

use super::error::{Result, SegError};

/// Per-class pixel overlap between a prediction and its ground truth
///
/// Label values outside `0..num_classes` (such as the 255 ignore value) never
/// count as ground truth, but a pixel predicted as class `k` still widens the
/// union of class `k` whatever its label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassOverlap {
    pub num_classes: usize,
    /// Pixels where prediction and label are both class k
    pub intersection: Vec<usize>,
    /// Pixels predicted as class k
    pub predicted: Vec<usize>,
    /// Pixels labelled as class k
    pub actual: Vec<usize>,
}

impl ClassOverlap {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            intersection: vec![0; num_classes],
            predicted: vec![0; num_classes],
            actual: vec![0; num_classes],
        }
    }

    /// Build the table for one image
    pub fn from_pixels(predictions: &[i64], labels: &[i64], num_classes: usize) -> Self {
        let mut overlap = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(labels.iter()) {
            overlap.add(actual, pred);
        }
        overlap
    }

    /// Add a single pixel
    pub fn add(&mut self, actual: i64, predicted: i64) {
        let n = self.num_classes as i64;
        let pred_in = (0..n).contains(&predicted);
        let actual_in = (0..n).contains(&actual);

        if pred_in {
            self.predicted[predicted as usize] += 1;
        }
        if actual_in {
            self.actual[actual as usize] += 1;
        }
        if pred_in && actual_in && predicted == actual {
            self.intersection[actual as usize] += 1;
        }
    }

    /// Pixels that belong to class k in the prediction or the label
    pub fn union(&self, class: usize) -> usize {
        self.predicted[class] + self.actual[class] - self.intersection[class]
    }

    /// IoU of class k, or `None` when the class is absent from both maps
    pub fn iou(&self, class: usize) -> Option<f64> {
        match self.union(class) {
            0 => None,
            union => Some(self.intersection[class] as f64 / union as f64),
        }
    }

    /// Mean IoU over the classes present in the prediction or the label
    pub fn mean_iou(&self) -> Option<f64> {
        let present: Vec<f64> = (0..self.num_classes).filter_map(|k| self.iou(k)).collect();
        if present.is_empty() {
            None
        } else {
            Some(present.iter().sum::<f64>() / present.len() as f64)
        }
    }
}

/// IoU statistics for one batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IouResult {
    /// Per-image mIoU summed over the batch
    pub total_iou: f64,
    /// Per-class IoU summed over the images where the class is present
    pub per_class_iou: Vec<f64>,
    /// Number of images in which each class is present
    pub images_per_class: Vec<usize>,
}

impl IouResult {
    pub fn new(num_classes: usize) -> Self {
        Self {
            total_iou: 0.0,
            per_class_iou: vec![0.0; num_classes],
            images_per_class: vec![0; num_classes],
        }
    }

    /// Fold another batch into this one
    pub fn accumulate(&mut self, other: &IouResult) {
        self.total_iou += other.total_iou;
        for (acc, v) in self.per_class_iou.iter_mut().zip(&other.per_class_iou) {
            *acc += v;
        }
        for (acc, v) in self.images_per_class.iter_mut().zip(&other.images_per_class) {
            *acc += v;
        }
    }
}

/// IoU of a batch of flattened class maps
///
/// `predictions` and `labels` hold `batch * pixels_per_image` class indices in
/// image-major order.
pub fn get_iou(
    predictions: &[i64],
    labels: &[i64],
    pixels_per_image: usize,
    num_classes: usize,
) -> Result<IouResult> {
    if predictions.len() != labels.len() {
        return Err(SegError::Training(format!(
            "prediction has {} pixels but label has {}",
            predictions.len(),
            labels.len()
        )));
    }
    if pixels_per_image == 0 || predictions.len() % pixels_per_image != 0 {
        return Err(SegError::Training(format!(
            "{} pixels do not split into images of {} pixels",
            predictions.len(),
            pixels_per_image
        )));
    }

    let mut result = IouResult::new(num_classes);
    for (pred, gt) in predictions
        .chunks(pixels_per_image)
        .zip(labels.chunks(pixels_per_image))
    {
        let overlap = ClassOverlap::from_pixels(pred, gt, num_classes);
        for k in 0..num_classes {
            if let Some(iou) = overlap.iou(k) {
                result.per_class_iou[k] += iou;
                result.images_per_class[k] += 1;
            }
        }
        result.total_iou += overlap.mean_iou().unwrap_or(0.0);
    }

    Ok(result)
}

/// [`get_iou`] over `[N, H, W]` class-index tensors
pub fn batch_iou<B: Backend>(
    predictions: Tensor<B, 3, Int>,
    labels: Tensor<B, 3, Int>,
    num_classes: usize,
) -> Result<IouResult> {
    let [_, height, width] = predictions.dims();
    let preds = int_tensor_to_vec(predictions)?;
    let gts = int_tensor_to_vec(labels)?;
    get_iou(&preds, &gts, height * width, num_classes)
}

/// Copy an integer tensor to the host as i64 values
pub fn int_tensor_to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| SegError::Training(format!("failed to read tensor data: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_prediction_gives_unit_miou() {
        let labels = vec![0, 0, 1, 1, 1, 0, 0, 1];
        let result = get_iou(&labels, &labels, 4, 2).unwrap();
        // two images, each with mIoU 1.0
        assert!((result.total_iou / 2.0 - 1.0).abs() < 1e-12);
        assert_eq!(result.images_per_class, vec![2, 2]);
    }

    #[test]
    fn test_disjoint_prediction_gives_zero_miou() {
        let labels = vec![0, 0, 1, 1];
        let preds = vec![1, 1, 0, 0];
        let result = get_iou(&preds, &labels, 4, 2).unwrap();
        assert_eq!(result.total_iou, 0.0);
        assert_eq!(result.per_class_iou, vec![0.0, 0.0]);
    }

    #[test]
    fn test_partial_overlap() {
        // class 0: inter 1, union 2 -> 0.5 ; class 1: inter 2, union 3 -> 2/3
        let labels = vec![0, 0, 1, 1];
        let preds = vec![0, 1, 1, 1];
        let result = get_iou(&preds, &labels, 4, 2).unwrap();
        let expected = (0.5 + 2.0 / 3.0) / 2.0;
        assert!((result.total_iou - expected).abs() < 1e-12);
    }

    #[test]
    fn test_absent_class_is_skipped() {
        let labels = vec![0, 0, 0, 0];
        let result = get_iou(&labels, &labels, 4, 3).unwrap();
        assert_eq!(result.total_iou, 1.0);
        assert_eq!(result.images_per_class, vec![1, 0, 0]);
    }

    #[test]
    fn test_ignore_label_widens_union_only() {
        let labels = vec![255, 0, 0, 0];
        let preds = vec![0, 0, 0, 0];
        let overlap = ClassOverlap::from_pixels(&preds, &labels, 2);
        assert_eq!(overlap.intersection[0], 3);
        assert_eq!(overlap.union(0), 4);
        assert_eq!(overlap.iou(1), None);
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        assert!(get_iou(&[0, 1], &[0], 1, 2).is_err());
        assert!(get_iou(&[0, 1, 0], &[0, 1, 0], 2, 2).is_err());
    }

    #[test]
    fn test_accumulate() {
        let mut acc = IouResult::new(2);
        let batch = get_iou(&[0, 1], &[0, 1], 2, 2).unwrap();
        acc.accumulate(&batch);
        acc.accumulate(&batch);
        assert_eq!(acc.total_iou, 2.0);
        assert_eq!(acc.images_per_class, vec![2, 2]);
    }
}
