//! Visualization helpers
//!
//! Turns batches of images and class maps into RGB grids for the metrics
//! sink and into the per-batch diagnostic PNGs written during testing.

use std::path::{Path, PathBuf};

use burn::tensor::{backend::Backend, Int, Tensor};
use image::{Rgb, RgbImage};

use super::error::{Result, SegError};
use super::metrics::int_tensor_to_vec;

/// A float image in CHW layout
#[derive(Debug, Clone, PartialEq)]
pub struct ChwImage {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl ChwImage {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != channels * height * width {
            return Err(SegError::Training(format!(
                "expected {}x{}x{} values, got {}",
                channels,
                height,
                width,
                data.len()
            )));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Value at (c, y, x); single-channel images repeat their only plane
    fn at(&self, c: usize, y: usize, x: usize) -> f32 {
        let c = if self.channels == 1 { 0 } else { c };
        self.data[c * self.height * self.width + y * self.width + x]
    }

    fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }
}

/// Color for class `k` in the Pascal VOC palette
pub fn class_color(class: usize) -> [u8; 3] {
    let mut rgb = [0u8; 3];
    let mut c = class;
    for j in 0..8 {
        for (channel, value) in rgb.iter_mut().enumerate() {
            *value |= (((c >> channel) & 1) as u8) << (7 - j);
        }
        c >>= 3;
    }
    rgb
}

/// Decode a class-index map into an RGB image with values in [0, 1]
///
/// Indices outside `0..num_classes` (the ignore label) stay black.
pub fn decode_segmap(labels: &[i64], height: usize, width: usize, num_classes: usize) -> Result<ChwImage> {
    let plane = height * width;
    if labels.len() != plane {
        return Err(SegError::Training(format!(
            "expected {}x{} class indices, got {}",
            height,
            width,
            labels.len()
        )));
    }

    let mut data = vec![0.0f32; 3 * plane];
    for (i, &label) in labels.iter().enumerate() {
        if label < 0 || label as usize >= num_classes {
            continue;
        }
        let color = class_color(label as usize);
        for c in 0..3 {
            data[c * plane + i] = color[c] as f32 / 255.0;
        }
    }
    ChwImage::new(3, height, width, data)
}

/// Split a `[N, C, H, W]` float batch into host images
pub fn batch_to_images<B: Backend>(batch: Tensor<B, 4>) -> Result<Vec<ChwImage>> {
    let [n, c, h, w] = batch.dims();
    let data = batch
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| SegError::Training(format!("failed to read tensor data: {:?}", e)))?;

    data.chunks(c * h * w)
        .take(n)
        .map(|chunk| ChwImage::new(c, h, w, chunk.to_vec()))
        .collect()
}

/// Decode every map of a `[N, H, W]` class-index batch
pub fn decode_segmap_batch<B: Backend>(maps: Tensor<B, 3, Int>, num_classes: usize) -> Result<Vec<ChwImage>> {
    let [n, h, w] = maps.dims();
    let data = int_tensor_to_vec(maps)?;
    data.chunks(h * w)
        .take(n)
        .map(|chunk| decode_segmap(chunk, h, w, num_classes))
        .collect()
}

/// The first `count` samples as input, decoded prediction, decoded label
pub fn sample_triplets<B: Backend>(
    images: Tensor<B, 4>,
    predictions: Tensor<B, 3, Int>,
    labels: Tensor<B, 3, Int>,
    count: usize,
    num_classes: usize,
) -> Result<Vec<ChwImage>> {
    let k = count.min(images.dims()[0]);
    let inputs = batch_to_images(images.slice([0..k]))?;
    let preds = decode_segmap_batch(predictions.slice([0..k]), num_classes)?;
    let gts = decode_segmap_batch(labels.slice([0..k]), num_classes)?;

    Ok(inputs
        .into_iter()
        .zip(preds)
        .zip(gts)
        .flat_map(|((input, pred), gt)| [input, pred, gt])
        .collect())
}

/// Grid layout options
#[derive(Debug, Clone, Copy)]
pub struct GridOptions {
    /// Images per row
    pub nrow: usize,
    /// Border between cells, in pixels
    pub padding: usize,
    /// Rescale pixel values to [0, 1]
    pub normalize: bool,
    /// Rescale each image by its own range rather than the grid's
    pub scale_each: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            nrow: 3,
            padding: 2,
            normalize: true,
            scale_each: true,
        }
    }
}

/// Tile images into one RGB grid with black padding
///
/// All images must share the spatial size of the first one.
pub fn make_grid(images: &[ChwImage], options: GridOptions) -> Result<RgbImage> {
    let first = images
        .first()
        .ok_or_else(|| SegError::Training("cannot build a grid from zero images".to_string()))?;
    let (h, w) = (first.height, first.width);
    if images.iter().any(|img| img.height != h || img.width != w) {
        return Err(SegError::Training("grid images differ in size".to_string()));
    }

    let pad = options.padding;
    let xmaps = options.nrow.max(1).min(images.len());
    let ymaps = images.len().div_ceil(xmaps);
    let cell_h = h + pad;
    let cell_w = w + pad;
    let mut grid = RgbImage::new((xmaps * cell_w + pad) as u32, (ymaps * cell_h + pad) as u32);

    let global_range = images.iter().map(ChwImage::min_max).fold(
        (f32::INFINITY, f32::NEG_INFINITY),
        |(lo, hi), (a, b)| (lo.min(a), hi.max(b)),
    );

    for (idx, img) in images.iter().enumerate() {
        let range = match (options.normalize, options.scale_each) {
            (false, _) => None,
            (true, true) => Some(img.min_max()),
            (true, false) => Some(global_range),
        };
        let (row, col) = (idx / xmaps, idx % xmaps);
        let (oy, ox) = (row * cell_h + pad, col * cell_w + pad);

        for y in 0..h {
            for x in 0..w {
                let mut px = [0u8; 3];
                for (c, value) in px.iter_mut().enumerate() {
                    let mut v = img.at(c, y, x);
                    if let Some((lo, hi)) = range {
                        v = (v.clamp(lo, hi) - lo) / (hi - lo).max(1e-5);
                    }
                    *value = (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8;
                }
                grid.put_pixel((ox + x) as u32, (oy + y) as u32, Rgb(px));
            }
        }
    }

    Ok(grid)
}

/// Write the input and its decoded prediction side by side as `%04d-results.png`
pub fn save_test_image(
    input: &ChwImage,
    prediction: &ChwImage,
    index: usize,
    dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let grid = make_grid(
        &[input.clone(), prediction.clone()],
        GridOptions {
            nrow: 2,
            normalize: false,
            ..Default::default()
        },
    )?;
    let path = dir.join(format!("{:04}-results.png", index));
    grid.save(&path)?;
    Ok(path)
}
