// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - NHWC 帧定义
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
}

/// RGB 帧，按 NHWC（行、列、通道）存储像素
#[derive(Debug, Clone, PartialEq)]
pub struct RgbNhwcFrame {
  image: RgbImage,
}

impl RgbNhwcFrame {
  pub fn with_shape(height: usize, width: usize) -> Self {
    Self {
      image: RgbImage::new(width as u32, height as u32),
    }
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    let actual = data.len();
    RgbImage::from_raw(width, height, data)
      .filter(|_| actual == expected)
      .map(|image| Self { image })
      .ok_or(FrameError::SizeMismatch { expected, actual })
  }

  pub fn height(&self) -> usize {
    self.image.height() as usize
  }

  pub fn width(&self) -> usize {
    self.image.width() as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn as_image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }

  /// 最近邻缩放到指定尺寸，尺寸一致时直接复制
  pub fn resize_nearest(&self, width: u32, height: u32) -> Self {
    if self.image.width() == width && self.image.height() == height {
      return self.clone();
    }
    Self {
      image: image::imageops::resize(&self.image, width, height, FilterType::Nearest),
    }
  }

  /// 复制出 `[x, x + width) × [y, y + height)` 区域，超出部分被裁掉
  pub fn sub_frame(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
    Self {
      image: image::imageops::crop_imm(&self.image, x, y, width, height).to_image(),
    }
  }
}

impl From<RgbImage> for RgbNhwcFrame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl AsMut<[u8]> for RgbNhwcFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.image
  }
}
