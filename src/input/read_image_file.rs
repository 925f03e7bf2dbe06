// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbNhwcFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图像作为只有一帧的输入
pub struct ImageFileInput {
  image: Option<RgbImage>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let path = crate::decoded_path(url);
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;
    info!("读取图像 {}: {}x{}", path, image.width(), image.height());

    Ok(ImageFileInput {
      image: Some(image.into_rgb8()),
    })
  }
}

impl ImageFileInput {
  pub fn into_nhwc(self) -> ImageFileInputNhwc {
    ImageFileInputNhwc { inner: self }
  }
}

pub struct ImageFileInputNhwc {
  inner: ImageFileInput,
}

impl Iterator for ImageFileInputNhwc {
  type Item = RgbNhwcFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.inner.image.take().map(RgbNhwcFrame::from)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_single_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face.png");
    RgbImage::from_pixel(6, 4, image::Rgb([9, 8, 7]))
      .save(&path)
      .unwrap();

    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut frames = ImageFileInput::from_url(&url).unwrap().into_nhwc();
    let frame = frames.next().unwrap();
    assert_eq!((frame.width(), frame.height()), (6, 4));
    assert_eq!(&frame.as_nhwc()[..3], &[9, 8, 7]);
    assert!(frames.next().is_none());
  }

  #[test]
  fn missing_file_is_io_error() {
    let url = Url::parse("image:///nonexistent/face.png").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
