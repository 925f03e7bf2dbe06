// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/detector.rs - 目标检测模型
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
use tracing::{debug, info};

use crate::{
  config::CascadeConfig,
  frame::RgbNhwcFrame,
  model::{InferenceError, Interpreter, Model, check_interpreter, decoded_output, feed_frame},
  tensor::DecodedTensor,
};

const DETECTOR_NUM_OUTPUTS: usize = 4;
const DETECTOR_BOX_SIZE: usize = 4;

#[derive(Error, Debug, PartialEq)]
pub enum ExtractError {
  #[error("top_k ({top_k}) 超出检测输出容量 ({capacity})")]
  TopKExceedsCapacity { top_k: usize, capacity: usize },
  #[error("检测框输出长度 {0} 不是 4 的整数倍")]
  MalformedBoxes(usize),
}

/// 归一化边界框，构造时将坐标限制到 `0 <= min <= max <= 1`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub xmin: f64,
  pub ymin: f64,
  pub xmax: f64,
  pub ymax: f64,
}

impl BoundingBox {
  pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
    let xmin = xmin.max(0.0).min(1.0);
    let ymin = ymin.max(0.0).min(1.0);
    Self {
      xmin,
      ymin,
      xmax: xmax.min(1.0).max(xmin),
      ymax: ymax.min(1.0).max(ymin),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: u32,
  pub score: f64,
  pub bbox: BoundingBox,
}

/// 检测模型的四个解码后输出
#[derive(Debug, Clone)]
pub struct DetectorOutputs {
  /// 每行 `[ymin, xmin, ymax, xmax]`
  boxes: Vec<f64>,
  class_ids: Vec<f64>,
  scores: Vec<f64>,
  count: f64,
}

impl DetectorOutputs {
  pub fn new(
    boxes: &DecodedTensor,
    class_ids: &DecodedTensor,
    scores: &DecodedTensor,
    count: &DecodedTensor,
  ) -> Result<Self, ExtractError> {
    if boxes.len() % DETECTOR_BOX_SIZE != 0 {
      return Err(ExtractError::MalformedBoxes(boxes.len()));
    }
    Ok(Self {
      boxes: boxes.to_vec(),
      class_ids: class_ids.to_vec(),
      scores: scores.to_vec(),
      count: count.get(0).unwrap_or(0.0),
    })
  }

  /// 三个逐行输出中最短者的行数
  pub fn capacity(&self) -> usize {
    (self.boxes.len() / DETECTOR_BOX_SIZE)
      .min(self.class_ids.len())
      .min(self.scores.len())
  }

  /// 模型报告的有效行数
  pub fn count(&self) -> usize {
    if self.count.is_finite() && self.count > 0.0 {
      self.count as usize
    } else {
      0
    }
  }

  fn detection(&self, i: usize) -> Detection {
    let row = &self.boxes[i * DETECTOR_BOX_SIZE..(i + 1) * DETECTOR_BOX_SIZE];
    let (ymin, xmin, ymax, xmax) = (row[0], row[1], row[2], row[3]);
    Detection {
      class_id: self.class_ids[i] as u32,
      score: self.scores[i],
      bbox: BoundingBox::new(xmin, ymin, xmax, ymax),
    }
  }
}

/// 依次读取前 `top_k` 行，保留分数不低于阈值者，保持模型原有的分数降序
pub fn extract(
  outputs: &DetectorOutputs,
  score_threshold: f64,
  top_k: usize,
) -> Result<Vec<Detection>, ExtractError> {
  let capacity = outputs.capacity();
  if top_k > capacity {
    return Err(ExtractError::TopKExceedsCapacity { top_k, capacity });
  }

  Ok(
    (0..top_k)
      .map(|i| outputs.detection(i))
      .filter(|d| d.score >= score_threshold)
      .collect(),
  )
}

/// 检测模型：输出框、类别、分数、有效行数四个张量
pub struct Detector<I> {
  interpreter: I,
  config: CascadeConfig,
}

impl<I: Interpreter> Detector<I> {
  pub fn new(interpreter: I, config: CascadeConfig) -> Result<Self, InferenceError> {
    check_interpreter(&interpreter, DETECTOR_NUM_OUTPUTS)?;
    let shape = interpreter.input_shape();
    info!(
      "检测模型输入尺寸: {}x{}x{}",
      shape.width, shape.height, shape.channels
    );
    Ok(Self {
      interpreter,
      config,
    })
  }

  pub fn config(&self) -> &CascadeConfig {
    &self.config
  }

  fn outputs(&self) -> Result<DetectorOutputs, InferenceError> {
    let boxes = decoded_output(&self.interpreter, 0)?;
    let class_ids = decoded_output(&self.interpreter, 1)?;
    let scores = decoded_output(&self.interpreter, 2)?;
    let count = decoded_output(&self.interpreter, 3)?;
    Ok(DetectorOutputs::new(&boxes, &class_ids, &scores, &count)?)
  }
}

impl<I: Interpreter> Model for Detector<I> {
  type Input = RgbNhwcFrame;
  type Output = Vec<Detection>;
  type Error = InferenceError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置检测模型输入");
    feed_frame(&mut self.interpreter, input)?;

    debug!("执行检测模型推理");
    self.interpreter.invoke()?;

    let outputs = self.outputs()?;
    let top_k = if self.config.respect_count {
      self.config.top_k.min(outputs.count())
    } else {
      self.config.top_k
    };
    debug!(
      "检测输出: 容量 {}, 有效行数 {}, 读取 {} 行",
      outputs.capacity(),
      outputs.count(),
      top_k
    );

    let detections = extract(&outputs, self.config.score_threshold, top_k)?;
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}
