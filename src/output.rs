// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 输出定义
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

#[cfg(any(
  feature = "save_image_file",
  feature = "gstreamer_output",
  feature = "directory_record"
))]
use crate::{FromUrl, FromUrlWithScheme};
use thiserror::Error;
use url::Url;

use crate::{cascade::FrameAnnotations, frame::RgbNhwcFrame, label::Labels};

/// 渲染阶段独占当前帧，可在原地绘制叠加
pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &mut Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "draw")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display_output::{GStreamerDisplayOutput, GStreamerDisplayOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, RecordMode};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示输出错误: {0}")]
  GStreamerDisplayOutputError(#[from] GStreamerDisplayOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl crate::FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => {
        let output = SaveImageFileOutput::from_url(url)?;
        Ok(OutputWrapper::SaveImageFileOutput(output))
      }
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::SCHEME => {
        let output = GStreamerDisplayOutput::from_url(url)?;
        Ok(OutputWrapper::GStreamerDisplayOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl OutputWrapper {
  /// 目录记录输出使用标签名称，其余输出忽略
  pub fn with_labels(self, labels: std::sync::Arc<Labels>) -> Self {
    match self {
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => {
        OutputWrapper::DirectoryRecordOutput(output.with_labels(labels))
      }
      other => other,
    }
  }
}

impl Render<RgbNhwcFrame, FrameAnnotations> for OutputWrapper {
  type Error = OutputError;

  fn render_result(
    &self,
    frame: &mut RgbNhwcFrame,
    result: &FrameAnnotations,
  ) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
