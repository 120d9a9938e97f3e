//! 画像の前処理
//!
//! リサイズ → （学習時のみ）ランダム左右反転 → [0,1] スケーリング →
//! ImageNet の平均・標準偏差で正規化、の順に処理し、(C, H, W) の順で平坦化します。

use std::path::Path;

use image::{imageops::{self, FilterType}, DynamicImage};
use rand::Rng;

use crate::error::{DetectorError, Result};

/// ImageNet の平均（RGB）
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet の標準偏差（RGB）
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 画像サイズ
pub const IMAGE_SIZE: usize = 224;

/// 前処理パイプライン
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preprocessor {
    image_size: usize,
    augment: bool,
}

impl Preprocessor {
    /// 学習用（ランダム左右反転あり）
    pub fn train(image_size: usize) -> Self {
        Self { image_size, augment: true }
    }

    /// 検証・推論用（決定的）
    pub fn eval(image_size: usize) -> Self {
        Self { image_size, augment: false }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// 1枚あたりの要素数 (3 * size * size)
    pub fn tensor_len(&self) -> usize {
        3 * self.image_size * self.image_size
    }

    /// バイト列をデコード
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        image::load_from_memory(bytes).map_err(|e| DetectorError::Decode(e.to_string()))
    }

    /// 画像ファイルを読み込んでデコード
    pub fn open(path: &Path) -> Result<DynamicImage> {
        let bytes = std::fs::read(path)?;
        image::load_from_memory(&bytes)
            .map_err(|e| DetectorError::Decode(format!("{}: {}", path.display(), e)))
    }

    /// 画像を正規化済みの (C, H, W) 配列に変換
    ///
    /// 入力画像のサイズ・カラーモードに関わらず、出力長は常に [`Self::tensor_len`]。
    pub fn process<R: Rng + ?Sized>(&self, image: &DynamicImage, rng: &mut R) -> Vec<f32> {
        let size = self.image_size as u32;
        // 先に RGB へ変換してからリサイズ（透過ピクセルの色を縁に混ぜない）
        let mut rgb = imageops::resize(&image.to_rgb8(), size, size, FilterType::Triangle);

        if self.augment && rng.gen_bool(0.5) {
            imageops::flip_horizontal_in_place(&mut rgb);
        }

        let num_pixels = self.image_size * self.image_size;
        let mut data = vec![0.0f32; 3 * num_pixels];

        for (i, pixel) in rgb.pixels().enumerate() {
            for channel in 0..3 {
                let value = pixel[channel] as f32 / 255.0;
                data[channel * num_pixels + i] = (value - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            }
        }

        data
    }

    /// 画像ファイルを読み込んで変換
    pub fn load<R: Rng + ?Sized>(&self, path: &Path, rng: &mut R) -> Result<Vec<f32>> {
        let image = Self::open(path)?;
        Ok(self.process(&image, rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_output_shape_is_fixed() {
        let preprocessor = Preprocessor::eval(32);
        let inputs = [
            DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 50, Rgb([1, 2, 3]))),
            DynamicImage::ImageLuma8(GrayImage::from_pixel(300, 7, Luma([128]))),
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(64, 64, Rgba([9, 9, 9, 0]))),
        ];

        for image in &inputs {
            let data = preprocessor.process(image, &mut rng());
            assert_eq!(data.len(), 3 * 32 * 32);
        }
    }

    #[test]
    fn test_normalization_uses_imagenet_statistics() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 0, 255])));
        let data = Preprocessor::eval(4).process(&image, &mut rng());

        let expected_r = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let expected_g = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        let expected_b = (1.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];

        assert!((data[0] - expected_r).abs() < 1e-5);
        assert!((data[16] - expected_g).abs() < 1e-5);
        assert!((data[32] - expected_b).abs() < 1e-5);
    }

    #[test]
    fn test_eval_pipeline_is_deterministic() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 30, y as u8 * 30, 0])));
        let preprocessor = Preprocessor::eval(8);

        let a = preprocessor.process(&image, &mut StdRng::seed_from_u64(1));
        let b = preprocessor.process(&image, &mut StdRng::seed_from_u64(2));
        assert_eq!(a, b);
    }

    #[test]
    fn test_train_pipeline_flips_sometimes() {
        // 左右で色が異なる画像: 反転すると先頭ピクセルが変わる
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        }));
        let preprocessor = Preprocessor::train(8);
        let mut rng = rng();

        let first_pixels: Vec<f32> = (0..64).map(|_| preprocessor.process(&image, &mut rng)[0]).collect();
        let flipped = first_pixels.iter().filter(|&&v| v < 0.0).count();

        assert!(flipped > 0 && flipped < 64);
    }

    #[test]
    fn test_transparent_pixels_do_not_bleed_into_edges() {
        // 右半分は完全に透明だが、隠れた色は緑
        let image = DynamicImage::ImageRgba8(RgbaImage::from_fn(8, 8, |x, _| {
            if x < 4 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 255, 0, 0])
            }
        }));
        let expected = DynamicImage::ImageRgb8(image.to_rgb8());

        let preprocessor = Preprocessor::eval(4);
        let actual = preprocessor.process(&image, &mut rng());
        let via_rgb = preprocessor.process(&expected, &mut rng());

        assert_eq!(actual, via_rgb);
    }

    #[test]
    fn test_decode_rejects_corrupt_bytes() {
        let result = Preprocessor::decode(b"definitely not an image");
        assert!(matches!(result, Err(DetectorError::Decode(_))));
    }
}
