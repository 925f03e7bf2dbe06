// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! ## URL Scheme
//!
//! - 摄像头: `gst://camera/dev/video0?width=640&height=480&fps=30&rotate=90`
//! - 视频文件: `gst://file/path/to/video.mp4?rotate=180`
//!
//! 摄像头未指定 `width`/`height` 时使用设备默认分辨率。输出帧统一转换为 RGB，
//! 帧尺寸以实际协商结果为准。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, RgbNhwcFrame},
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("未知的输入源类型: {0}")]
  UnknownSource(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 布尔操作错误: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("无法获取 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态改变错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("帧构造失败: {0}")]
  FrameError(#[from] FrameError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
  },
  VideoFlip {
    method: u32,
  },
  TargetFormat {
    format: String,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location={} ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => {
        let mut caps = String::new();
        if let Some(width) = width {
          caps.push_str(&format!(",width={}", width));
        }
        if let Some(height) = height {
          caps.push_str(&format!(",height={}", height));
        }
        if let Some(fps) = fps {
          caps.push_str(&format!(",framerate={}/1", fps));
        }
        if caps.is_empty() {
          format!("v4l2src device={}", camera)
        } else {
          format!("v4l2src device={} ! video/x-raw{}", camera, caps)
        }
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl GStreamerInputPipelineBuilder {
  /// `/dev/video{idx}` 摄像头的输入 URL
  pub fn camera_url(idx: u32) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}://camera/dev/video{}", Self::SCHEME, idx))
  }

  fn parse_u32(query: &HashMap<String, String>, key: &str) -> Option<u32> {
    query.get(key).and_then(|v| v.parse::<u32>().ok())
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.pipeline_description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput { pipeline, appsink })
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let source = match url.host_str() {
      Some("camera") => GStreamerInputBuilderItem::CameraSource {
        camera: crate::decoded_path(url),
        width: Self::parse_u32(&query, "width"),
        height: Self::parse_u32(&query, "height"),
        fps: Self::parse_u32(&query, "fps"),
      },
      Some("file") => GStreamerInputBuilderItem::FileSource(crate::decoded_path(url)),
      other => {
        return Err(GStreamerInputError::UnknownSource(
          other.unwrap_or_default().to_string(),
        ));
      }
    };

    let mut items = vec![source];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));
    items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(GStreamerInputPipelineBuilder { items })
  }
}

/// 管理 GStreamer 管道与 appsink，释放时停止管道
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

impl GStreamerInput {
  pub fn into_nhwc(self) -> GStreamerInputNhwc {
    GStreamerInputNhwc { inner: self }
  }

  fn pull_sample(&self) -> Option<gst::Sample> {
    self
      .appsink
      .pull_sample()
      .map_err(|e| {
        info!("输入流结束: {}", e);
        e
      })
      .ok()
  }
}

/// 采集失败或流结束时迭代终止
pub struct GStreamerInputNhwc {
  inner: GStreamerInput,
}

impl Iterator for GStreamerInputNhwc {
  type Item = RgbNhwcFrame;

  fn next(&mut self) -> Option<Self::Item> {
    let sample = self.inner.pull_sample()?;
    convert_sample_to_nhwc(&sample)
      .map_err(|e| {
        error!("读取帧失败: {}", e);
        e
      })
      .ok()
  }
}

fn convert_sample_to_nhwc(sample: &gst::Sample) -> Result<RgbNhwcFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;

  let bgr = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  };
  let rgb = pack_rows(map.as_slice(), width, height, stride, bgr)?;

  Ok(RgbNhwcFrame::from_raw(width as u32, height as u32, rgb)?)
}

/// 去掉每行末尾的对齐填充，必要时交换 B/R 通道
fn pack_rows(
  data: &[u8],
  width: usize,
  height: usize,
  stride: usize,
  bgr: bool,
) -> Result<Vec<u8>, GStreamerInputError> {
  let row_bytes = width * 3;
  let expected = if height == 0 {
    0
  } else {
    stride * (height - 1) + row_bytes
  };
  if data.len() < expected || stride < row_bytes {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut rgb = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let line = &data[row * stride..row * stride + row_bytes];
    if bgr {
      for px in line.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
      }
    } else {
      rgb.extend_from_slice(line);
    }
  }
  Ok(rgb)
}
