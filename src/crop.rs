// 该文件是 Shanan （山南西风） 项目的一部分。
// src/crop.rs - 检测框裁剪
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

use thiserror::Error;

use crate::{frame::RgbNhwcFrame, model::BoundingBox};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CropError {
  #[error("裁剪区域面积为零: {0:?}")]
  Degenerate(PixelRect),
}

/// 帧上的像素矩形，`x1`/`y1` 不包含在内
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x0: u32,
  pub y0: u32,
  pub x1: u32,
  pub y1: u32,
}

impl PixelRect {
  /// 将归一化坐标映射到 `width × height` 的帧上，逐坐标向下取整
  pub fn from_bbox(bbox: &BoundingBox, width: usize, height: usize) -> Self {
    let (w, h) = (width as f64, height as f64);
    Self {
      x0: (bbox.xmin * w).floor() as u32,
      y0: (bbox.ymin * h).floor() as u32,
      x1: (bbox.xmax * w).floor() as u32,
      y1: (bbox.ymax * h).floor() as u32,
    }
  }

  pub fn width(&self) -> u32 {
    self.x1.saturating_sub(self.x0)
  }

  pub fn height(&self) -> u32 {
    self.y1.saturating_sub(self.y0)
  }

  pub fn is_empty(&self) -> bool {
    self.x1 <= self.x0 || self.y1 <= self.y0
  }
}

/// 检测框对应的子图
#[derive(Debug, Clone)]
pub struct Crop {
  pub rect: PixelRect,
  pub image: RgbNhwcFrame,
}

pub fn derive_crop(frame: &RgbNhwcFrame, bbox: &BoundingBox) -> Result<Crop, CropError> {
  let rect = PixelRect::from_bbox(bbox, frame.width(), frame.height());
  if rect.is_empty() {
    return Err(CropError::Degenerate(rect));
  }
  let image = frame.sub_frame(rect.x0, rect.y0, rect.width(), rect.height());
  Ok(Crop { rect, image })
}
