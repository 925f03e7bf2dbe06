// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/classifier.rs - 口罩二分类模型
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

use std::fmt;

use tracing::{debug, info};

use crate::{
  frame::RgbNhwcFrame,
  model::{InferenceError, Interpreter, Model, check_interpreter, decoded_output, feed_frame},
};

const CLASSIFIER_NUM_OUTPUTS: usize = 1;
const CLASSIFIER_NUM_CLASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskLabel {
  Mask,
  NoMask,
}

impl MaskLabel {
  pub fn is_positive(&self) -> bool {
    matches!(self, MaskLabel::Mask)
  }
}

impl fmt::Display for MaskLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MaskLabel::Mask => write!(f, "Mask"),
      MaskLabel::NoMask => write!(f, "No Mask"),
    }
  }
}

/// 分类模型的两类分数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationResult {
  pub mask_score: f64,
  pub without_mask_score: f64,
}

impl ClassificationResult {
  /// 分数严格更高时才判为 Mask，相等时判为 No Mask
  pub fn label(&self) -> MaskLabel {
    if self.mask_score > self.without_mask_score {
      MaskLabel::Mask
    } else {
      MaskLabel::NoMask
    }
  }

  /// 百分制置信度
  pub fn confidence(&self) -> f64 {
    self.mask_score.max(self.without_mask_score) * 100.0
  }

  /// 叠加在画面上的文字，例如 `Mask (64,48): 70.00%`
  pub fn caption(&self, x0: u32, y0: u32) -> String {
    format!("{} ({},{}): {:.2}%", self.label(), x0, y0, self.confidence())
  }
}

pub struct Classifier<I> {
  interpreter: I,
}

impl<I: Interpreter> Classifier<I> {
  pub fn new(interpreter: I) -> Result<Self, InferenceError> {
    check_interpreter(&interpreter, CLASSIFIER_NUM_OUTPUTS)?;
    let shape = interpreter.input_shape();
    info!(
      "分类模型输入尺寸: {}x{}x{}",
      shape.width, shape.height, shape.channels
    );
    Ok(Self { interpreter })
  }
}

impl<I: Interpreter> Model for Classifier<I> {
  type Input = RgbNhwcFrame;
  type Output = ClassificationResult;
  type Error = InferenceError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    feed_frame(&mut self.interpreter, input)?;
    self.interpreter.invoke()?;

    let scores = decoded_output(&self.interpreter, 0)?;
    if scores.len() != CLASSIFIER_NUM_CLASSES {
      return Err(InferenceError::UnexpectedOutput(format!(
        "分类输出应包含 {} 个分数, 实际形状 {:?}",
        CLASSIFIER_NUM_CLASSES,
        scores.shape()
      )));
    }

    let scores = scores.to_vec();
    let result = ClassificationResult {
      mask_score: scores[0],
      without_mask_score: scores[1],
    };
    debug!("分类结果: {:?}", result);
    Ok(result)
  }
}
