// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/gstreamer_display_output.rs - GStreamer 窗口显示输出
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

//! # GStreamer 显示输出
//!
//! 将标注后的帧推送到 `appsrc ! videoconvert ! <sink>` 管道实时显示。
//!
//! ## URL Scheme
//!
//! `display://?sink=autovideosink&font=/path/font.ttf`
//!
//! - `sink`: 显示元素，默认 `autovideosink`
//! - `font`: 标签文字所用字体，省略时查找系统字体，均不可用时只绘制边框
//!
//! 帧尺寸由第一帧决定，尺寸变化时更新 caps。

use std::cell::{Cell, RefCell};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
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

const DEFAULT_SINK: &str = "autovideosink";

#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsrc 元素")]
  AppSrcNotFound,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("推送缓冲区失败: {0}")]
  FlowError(#[from] gst::FlowError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
}

pub struct GStreamerDisplayOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  draw: Draw,
  video_info: RefCell<Option<gst_video::VideoInfo>>,
  frame_count: Cell<u64>,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "display";
}

impl FromUrl for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerDisplayOutputError::SchemeMismatch);
    }

    gst::init()?;

    let sink = url
      .query_pairs()
      .find(|(k, _)| k == "sink")
      .map(|(_, v)| v.into_owned())
      .unwrap_or_else(|| DEFAULT_SINK.to_string());
    let pipeline_desc = format!(
      "appsrc name=src is-live=true do-timestamp=true format=time ! videoconvert ! {} sync=false",
      sink
    );
    info!("创建显示管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerDisplayOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcNotFound)?;

    let draw = Draw::from_url(url)?;
    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerDisplayOutput {
      pipeline,
      appsrc,
      draw,
      video_info: RefCell::new(None),
      frame_count: Cell::new(0),
    })
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止显示管道失败: {}", e);
    }
    info!("显示输出关闭，共显示 {} 帧", self.frame_count.get());
  }
}

impl GStreamerDisplayOutput {
  fn video_info(
    &self,
    width: u32,
    height: u32,
  ) -> Result<gst_video::VideoInfo, GStreamerDisplayOutputError> {
    let cached = self
      .video_info
      .borrow()
      .clone()
      .filter(|info| info.width() == width && info.height() == height);
    if let Some(info) = cached {
      return Ok(info);
    }

    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(gst::Fraction::new(0, 1))
      .build()?;
    self.appsrc.set_caps(Some(&info.to_caps()?));
    info!(
      "显示尺寸: {}x{}, 行步长: {}",
      width,
      height,
      info.stride()[0]
    );
    *self.video_info.borrow_mut() = Some(info.clone());
    Ok(info)
  }

  fn push_frame(&self, frame: &RgbNhwcFrame) -> Result<(), GStreamerDisplayOutputError> {
    let (width, height) = (frame.width() as u32, frame.height() as u32);
    let info = self.video_info(width, height)?;
    let data = pad_rows(
      frame.as_nhwc(),
      width as usize * 3,
      info.stride()[0] as usize,
      info.size(),
    );
    let buffer = gst::Buffer::from_mut_slice(data);
    self.appsrc.push_buffer(buffer)?;
    self.frame_count.set(self.frame_count.get() + 1);
    Ok(())
  }
}

impl Render<RgbNhwcFrame, FrameAnnotations> for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn render_result(
    &self,
    frame: &mut RgbNhwcFrame,
    result: &FrameAnnotations,
  ) -> Result<(), Self::Error> {
    self.draw.draw_annotations(frame.as_image_mut(), result);
    self.push_frame(frame)
  }
}

/// 按目标行步长复制紧密排列的 RGB 行，行尾补零
fn pad_rows(data: &[u8], row_bytes: usize, stride: usize, size: usize) -> Vec<u8> {
  if stride == row_bytes && data.len() == size {
    return data.to_vec();
  }
  let mut buffer = vec![0u8; size];
  for (y, row) in data.chunks_exact(row_bytes).enumerate() {
    let start = y * stride;
    if start + row_bytes > size {
      break;
    }
    buffer[start..start + row_bytes].copy_from_slice(row);
  }
  buffer
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn aligned_rows_are_copied_as_is() {
    let data: Vec<u8> = (0..24).collect();
    assert_eq!(pad_rows(&data, 12, 12, 24), data);
  }

  #[test]
  fn odd_width_rows_are_padded_to_stride() {
    // 宽 3 像素: 每行 9 字节, 步长对齐到 12
    let data: Vec<u8> = (1..=18).collect();
    let padded = pad_rows(&data, 9, 12, 24);
    assert_eq!(padded.len(), 24);
    assert_eq!(&padded[0..9], &data[0..9]);
    assert_eq!(&padded[9..12], &[0, 0, 0]);
    assert_eq!(&padded[12..21], &data[9..18]);
  }

  #[test]
  fn wide_frame_keeps_every_row_start() {
    // 642 像素宽的 RGB 行为 1926 字节, 对齐后为 1928
    let (row_bytes, stride, height) = (1926, 1928, 4);
    let data: Vec<u8> = (0..height)
      .flat_map(|y| std::iter::repeat_n(y as u8 + 1, row_bytes))
      .collect();
    let padded = pad_rows(&data, row_bytes, stride, stride * height);
    for y in 0..height {
      assert_eq!(padded[y * stride], y as u8 + 1);
      assert_eq!(padded[y * stride + row_bytes - 1], y as u8 + 1);
    }
  }
}
