// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  cascade::FrameAnnotations,
  frame::RgbNhwcFrame,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

/// 将标注后的帧写入单个图像文件，后续帧覆盖之前的结果
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(crate::decoded_path(uri)),
      draw: Draw::from_url(uri)?,
    })
  }
}

impl SaveImageFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render<RgbNhwcFrame, FrameAnnotations> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(
    &self,
    frame: &mut RgbNhwcFrame,
    result: &FrameAnnotations,
  ) -> Result<(), Self::Error> {
    self.draw.draw_annotations(frame.as_image_mut(), result);

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    frame.as_image().save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn writes_png_into_missing_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("out.png");
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "image", 1)).unwrap();

    let output = SaveImageFileOutput::from_url(&url).unwrap();
    let mut frame = RgbNhwcFrame::with_shape(8, 12);
    output
      .render_result(&mut frame, &FrameAnnotations::default())
      .unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!((saved.width(), saved.height()), (12, 8));
  }

  #[test]
  fn path_with_space_and_chinese_is_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("my output").join("口罩.png");
    let mut url = Url::parse("image://").unwrap();
    url.set_path(&path.to_string_lossy());

    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), path.as_path());
    let mut frame = RgbNhwcFrame::with_shape(4, 4);
    output
      .render_result(&mut frame, &FrameAnnotations::default())
      .unwrap();
    assert!(path.is_file());
  }

  #[test]
  fn rejects_other_scheme() {
    let url = Url::parse("folder:///tmp/out").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
