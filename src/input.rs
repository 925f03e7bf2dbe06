// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use crate::{FromUrl, frame::RgbNhwcFrame};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputBuilderItem, GStreamerInputError, GStreamerInputPipelineBuilder,
};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InputWrapper {
  pub fn into_nhwc(self) -> InputWrapperNhwcIter {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => {
        InputWrapperNhwcIter::GStreamerInput(input.into_nhwc())
      }
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => InputWrapperNhwcIter::ReadImageFile(input.into_nhwc()),
    }
  }
}

pub enum InputWrapperNhwcIter {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(self::gstreamer_input::GStreamerInputNhwc),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(self::read_image_file::ImageFileInputNhwc),
}

impl Iterator for InputWrapperNhwcIter {
  type Item = RgbNhwcFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapperNhwcIter::GStreamerInput(input) => input.next(),
      #[cfg(feature = "read_image_file")]
      InputWrapperNhwcIter::ReadImageFile(input) => input.next(),
    }
  }
}
