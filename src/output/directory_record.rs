// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! `folder:///dir?record=name|id&always&font=/path/font.ttf`
//!
//! 按 `年/月/日` 分目录保存帧。默认保存绘制后的图像；指定 `record` 时保存原始图像，
//! 并在同名 `.jsonl` 文件中逐行写入每个检测的记录。未指定 `always` 时跳过没有检测的帧。

use std::{
  fs::File,
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
  },
};

use chrono::{Datelike, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  cascade::{Classification, FrameAnnotations, SkipReason},
  frame::RgbNhwcFrame,
  label::Labels,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
}

pub enum RecordMode {
  Draw(Box<Draw>),
  Record { label_with_name: bool },
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  mode: RecordMode,
  labels: Option<Arc<Labels>>,
  frame_counter: AtomicU32,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mode = match uri.query_pairs().find(|(k, _)| k == "record") {
      Some((_, v)) => RecordMode::Record {
        label_with_name: v != "id",
      },
      None => RecordMode::Draw(Box::new(Draw::from_url(uri)?)),
    };
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(crate::decoded_path(uri)),
      mode,
      labels: None,
      frame_counter: AtomicU32::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn with_labels(mut self, labels: Arc<Labels>) -> Self {
    self.labels = Some(labels);
    self
  }

  fn frame_id(&self) -> u32 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn class_name(&self, class_id: u32, label_with_name: bool) -> String {
    match &self.labels {
      Some(labels) if label_with_name => labels.name_or_id(class_id).into_owned(),
      _ => class_id.to_string(),
    }
  }

  fn write_records(
    &self,
    path: &Path,
    result: &FrameAnnotations,
    label_with_name: bool,
  ) -> Result<(), DirectoryRecordOutputError> {
    let mut writer = BufWriter::new(File::create(path.with_extension("jsonl"))?);
    for (index, detection) in result.detections.iter().enumerate() {
      let bbox = &detection.bbox;
      let mut record = json!({
        "index": index,
        "class": self.class_name(detection.class_id, label_with_name),
        "score": detection.score,
        "bbox": [bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax],
      });
      match result.classifications.slot(index) {
        Some(Classification::Classified { rect, result }) => {
          record["rect"] = json!([rect.x0, rect.y0, rect.x1, rect.y1]);
          record["label"] = json!(result.label().to_string());
          record["confidence"] = json!(result.confidence());
        }
        Some(Classification::Skipped { rect, reason }) => {
          record["rect"] = json!([rect.x0, rect.y0, rect.x1, rect.y1]);
          record["skipped"] = json!(match reason {
            SkipReason::DegenerateCrop => "degenerate crop".to_string(),
            SkipReason::InvocationFailed(e) => e.clone(),
          });
        }
        None => {}
      }
      serde_json::to_writer(&mut writer, &record)?;
      writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
  }
}

impl Render<RgbNhwcFrame, FrameAnnotations> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(
    &self,
    frame: &mut RgbNhwcFrame,
    result: &FrameAnnotations,
  ) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    match &self.mode {
      RecordMode::Draw(draw) => {
        draw.draw_annotations(frame.as_image_mut(), result);
        frame.as_image().save(&path)?;
      }
      RecordMode::Record { label_with_name } => {
        frame.as_image().save(&path)?;
        self.write_records(&path, result, *label_with_name)?;
      }
    }
    debug!("保存帧到: {}", path.display());
    Ok(())
  }
}
