// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 口罩分类结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{cascade::FrameAnnotations, crop::PixelRect, model::MaskLabel};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_OFFSET: i32 = 10; // 文字基线位于框上方 10 像素
const BORDER_THICKNESS: u32 = 2;
const MASK_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const NO_MASK_COLOR: [u8; 3] = [255, 0, 0]; // 红色

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONTS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 在帧上绘制分类框与文字；未提供字体时只画框
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

impl Draw {
  pub fn with_font(font: FontVec) -> Self {
    Self {
      font: Some(font),
      ..Default::default()
    }
  }

  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    info!("加载字体文件: {}", path.display());
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data)?;
    Ok(Self::with_font(font))
  }

  /// 读取输出 URL 中的 `font` 参数，省略时查找系统字体
  pub fn from_url(url: &Url) -> Result<Self, DrawError> {
    match url.query_pairs().find(|(k, _)| k == "font") {
      Some((_, path)) => Self::from_font_file(path.as_ref()),
      None => Ok(Self::from_candidates(SYSTEM_FONTS)),
    }
  }

  /// 使用第一个可加载的字体；全部失败时只绘制边框
  pub fn from_candidates<P: AsRef<Path>>(candidates: &[P]) -> Self {
    for path in candidates {
      let path = path.as_ref();
      if !path.is_file() {
        continue;
      }
      match Self::from_font_file(path) {
        Ok(draw) => return draw,
        Err(e) => warn!("字体 {} 不可用: {}", path.display(), e),
      }
    }
    warn!("未找到可用字体，只绘制边框，可通过输出 URL 的 `font` 参数指定字体文件");
    Self::default()
  }

  /// 是否会绘制标签文字
  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn color(label: MaskLabel) -> Rgb<u8> {
    match label {
      MaskLabel::Mask => Rgb(MASK_COLOR),
      MaskLabel::NoMask => Rgb(NO_MASK_COLOR),
    }
  }

  fn draw_border(&self, image: &mut RgbImage, rect: PixelRect, color: Rgb<u8>) {
    for t in 0..BORDER_THICKNESS {
      let (w, h) = (rect.width(), rect.height());
      if w <= 2 * t || h <= 2 * t {
        break;
      }
      let r = Rect::at((rect.x0 + t) as i32, (rect.y0 + t) as i32).of_size(w - 2 * t, h - 2 * t);
      draw_hollow_rect_mut(image, r, color);
    }
  }

  /// 只绘制已分类的检测，被跳过的检测不产生任何叠加
  pub fn draw_annotations(&self, image: &mut RgbImage, annotations: &FrameAnnotations) {
    for (_, rect, result) in annotations.classifications.classified() {
      let color = Self::color(result.label());
      self.draw_border(image, rect, color);

      if let Some(font) = &self.font {
        let caption = result.caption(rect.x0, rect.y0);
        let scale = PxScale::from(self.font_size);
        let y = rect.y0 as i32 - LABEL_OFFSET - self.font_size as i32;
        draw_text_mut(image, color, rect.x0 as i32, y.max(0), scale, font, &caption);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    cascade::classify_all,
    frame::RgbNhwcFrame,
    model::{BoundingBox, ClassificationResult, Detection, Model},
  };

  struct Fixed(ClassificationResult);

  impl Model for Fixed {
    type Input = RgbNhwcFrame;
    type Output = ClassificationResult;
    type Error = String;

    fn infer(&mut self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Ok(self.0)
    }
  }

  fn annotate(
    frame: &RgbNhwcFrame,
    boxes: &[BoundingBox],
    result: ClassificationResult,
  ) -> FrameAnnotations {
    let detections: Vec<Detection> = boxes
      .iter()
      .map(|bbox| Detection {
        class_id: 0,
        score: 0.9,
        bbox: *bbox,
      })
      .collect();
    let classifications = classify_all(&mut Fixed(result), frame, &detections);
    FrameAnnotations {
      detections,
      classifications,
    }
  }

  #[test]
  fn border_color_follows_label() {
    let frame = RgbNhwcFrame::with_shape(100, 100);
    let mut image = frame.as_image().clone();

    let masked = annotate(
      &frame,
      &[BoundingBox::new(0.1, 0.1, 0.5, 0.5)],
      ClassificationResult {
        mask_score: 0.9,
        without_mask_score: 0.1,
      },
    );
    Draw::default().draw_annotations(&mut image, &masked);
    assert_eq!(*image.get_pixel(10, 10), Rgb(MASK_COLOR));
    assert_eq!(*image.get_pixel(11, 11), Rgb(MASK_COLOR));
    assert_eq!(*image.get_pixel(12, 12), Rgb([0, 0, 0]));

    let unmasked = annotate(
      &frame,
      &[BoundingBox::new(0.6, 0.6, 0.9, 0.9)],
      ClassificationResult {
        mask_score: 0.2,
        without_mask_score: 0.8,
      },
    );
    Draw::default().draw_annotations(&mut image, &unmasked);
    assert_eq!(*image.get_pixel(60, 60), Rgb(NO_MASK_COLOR));
  }

  #[test]
  fn skipped_detection_draws_nothing() {
    let frame = RgbNhwcFrame::with_shape(100, 100);
    let mut image = frame.as_image().clone();
    let annotations = annotate(
      &frame,
      &[BoundingBox::new(0.3, 0.3, 0.305, 0.6)],
      ClassificationResult {
        mask_score: 0.9,
        without_mask_score: 0.1,
      },
    );
    assert_eq!(annotations.classifications.skipped_indices(), vec![0]);
    Draw::default().draw_annotations(&mut image, &annotations);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn explicit_missing_font_is_an_error() {
    let url = Url::parse("display://?font=/nonexistent/font.ttf").unwrap();
    assert!(matches!(Draw::from_url(&url), Err(DrawError::IoError(_))));
  }

  #[test]
  fn url_without_font_falls_back_to_system_fonts() {
    let url = Url::parse("display://").unwrap();
    let draw = Draw::from_url(&url).unwrap();
    let available = SYSTEM_FONTS
      .iter()
      .any(|p| Draw::from_font_file(p).is_ok());
    assert_eq!(draw.has_font(), available);
  }

  #[test]
  fn no_usable_candidate_means_boxes_only() {
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.ttf");
    std::fs::write(&broken, b"not a font").unwrap();

    let draw = Draw::from_candidates(&[dir.path().join("missing.ttf"), broken]);
    assert!(!draw.has_font());
  }
}
