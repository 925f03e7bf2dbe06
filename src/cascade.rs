// 该文件是 Shanan （山南西风） 项目的一部分。
// src/cascade.rs - 检测 + 分类级联
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

//! 每个检测框的裁剪子图依次送入分类模型，结果按检测序号一一对应。

use std::fmt::Display;

use tracing::{debug, warn};

use crate::{
  crop::{CropError, PixelRect, derive_crop},
  frame::RgbNhwcFrame,
  model::{ClassificationResult, Detection, MaskLabel, Model},
};

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
  /// 裁剪区域面积为零
  DegenerateCrop,
  /// 分类模型调用失败
  InvocationFailed(String),
}

/// 单个检测框的分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
  Classified {
    rect: PixelRect,
    result: ClassificationResult,
  },
  Skipped {
    rect: PixelRect,
    reason: SkipReason,
  },
}

impl Classification {
  pub fn rect(&self) -> PixelRect {
    match self {
      Classification::Classified { rect, .. } | Classification::Skipped { rect, .. } => *rect,
    }
  }

  pub fn result(&self) -> Option<&ClassificationResult> {
    match self {
      Classification::Classified { result, .. } => Some(result),
      Classification::Skipped { .. } => None,
    }
  }
}

/// 第 `j` 个元素对应当前帧第 `j` 个检测
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classifications {
  slots: Vec<Classification>,
}

impl Classifications {
  pub fn len(&self) -> usize {
    self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.slots.is_empty()
  }

  pub fn slot(&self, index: usize) -> Option<&Classification> {
    self.slots.get(index)
  }

  pub fn get(&self, index: usize) -> Option<&ClassificationResult> {
    self.slots.get(index).and_then(Classification::result)
  }

  pub fn iter(&self) -> impl Iterator<Item = (usize, &Classification)> {
    self.slots.iter().enumerate()
  }

  /// 已分类的检测序号、像素区域与结果
  pub fn classified(&self) -> impl Iterator<Item = (usize, PixelRect, &ClassificationResult)> {
    self.iter().filter_map(|(index, slot)| match slot {
      Classification::Classified { rect, result } => Some((index, *rect, result)),
      Classification::Skipped { .. } => None,
    })
  }

  pub fn skipped_indices(&self) -> Vec<usize> {
    self
      .iter()
      .filter(|(_, slot)| slot.result().is_none())
      .map(|(index, _)| index)
      .collect()
  }

  /// 判为 No Mask 的数量
  pub fn negatives(&self) -> usize {
    self
      .classified()
      .filter(|(_, _, result)| result.label() == MaskLabel::NoMask)
      .count()
  }
}

/// 逐个检测裁剪并分类，单个检测的失败只影响它自己的结果
pub fn classify_all<C>(
  classifier: &mut C,
  frame: &RgbNhwcFrame,
  detections: &[Detection],
) -> Classifications
where
  C: Model<Input = RgbNhwcFrame, Output = ClassificationResult>,
  C::Error: Display,
{
  let slots = detections
    .iter()
    .enumerate()
    .map(|(index, detection)| {
      let crop = match derive_crop(frame, &detection.bbox) {
        Ok(crop) => crop,
        Err(CropError::Degenerate(rect)) => {
          debug!("检测 {} 裁剪区域为空 {:?}, 跳过分类", index, rect);
          return Classification::Skipped {
            rect,
            reason: SkipReason::DegenerateCrop,
          };
        }
      };

      match classifier.infer(&crop.image) {
        Ok(result) => {
          debug!(
            "检测 {} ({},{}) 分类结果: {:?}",
            index, crop.rect.x0, crop.rect.y0, result
          );
          Classification::Classified {
            rect: crop.rect,
            result,
          }
        }
        Err(e) => {
          warn!("检测 {} 分类失败: {}", index, e);
          Classification::Skipped {
            rect: crop.rect,
            reason: SkipReason::InvocationFailed(e.to_string()),
          }
        }
      }
    })
    .collect();

  Classifications { slots }
}

/// 单帧的全部推理结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameAnnotations {
  pub detections: Vec<Detection>,
  pub classifications: Classifications,
}

impl FrameAnnotations {
  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }
}

/// 持有检测与分类两个模型，释放随所有权结束
pub struct InferenceSession<D, C> {
  detector: D,
  classifier: C,
}

impl<D, C> InferenceSession<D, C>
where
  D: Model<Input = RgbNhwcFrame, Output = Vec<Detection>>,
  C: Model<Input = RgbNhwcFrame, Output = ClassificationResult>,
  C::Error: Display,
{
  pub fn new(detector: D, classifier: C) -> Self {
    Self {
      detector,
      classifier,
    }
  }

  pub fn detect(&mut self, frame: &RgbNhwcFrame) -> Result<Vec<Detection>, D::Error> {
    self.detector.infer(frame)
  }

  pub fn classify(&mut self, frame: &RgbNhwcFrame, detections: &[Detection]) -> Classifications {
    classify_all(&mut self.classifier, frame, detections)
  }

  pub fn into_parts(self) -> (D, C) {
    (self.detector, self.classifier)
  }
}

impl<D, C> Model for InferenceSession<D, C>
where
  D: Model<Input = RgbNhwcFrame, Output = Vec<Detection>>,
  C: Model<Input = RgbNhwcFrame, Output = ClassificationResult>,
  C::Error: Display,
{
  type Input = RgbNhwcFrame;
  type Output = FrameAnnotations;
  type Error = D::Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let detections = self.detect(input)?;
    let classifications = self.classify(input, &detections);
    Ok(FrameAnnotations {
      detections,
      classifications,
    })
  }
}
