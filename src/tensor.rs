// 该文件是 Shanan （山南西风） 项目的一部分。
// src/tensor.rs - 输出张量与反量化
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

//! 推理引擎输出的原始张量，以及将其还原为浮点数值的解码过程。
//!
//! 量化输出按仿射关系还原：`value = scale * (raw - zero_point)`。
//! 当 `scale == 0` 时退化为 `value = raw - zero_point`，避免整个张量被解码为 0。

use ndarray::{ArrayD, IxDyn};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
  #[error("张量数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际 {actual} 个")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("量化参数无效: scale = {0}")]
  InvalidScale(f64),
  #[error("张量形状错误: {0}")]
  Shape(String),
}

/// 逐张量量化参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantizationParameters {
  scale: f64,
  zero_point: i64,
}

impl QuantizationParameters {
  pub fn new(scale: f64, zero_point: i64) -> Result<Self, TensorError> {
    if !(scale >= 0.0) || !scale.is_finite() {
      return Err(TensorError::InvalidScale(scale));
    }
    Ok(Self { scale, zero_point })
  }

  pub fn scale(&self) -> f64 {
    self.scale
  }

  pub fn zero_point(&self) -> i64 {
    self.zero_point
  }

  pub fn dequantize(&self, raw: f64) -> f64 {
    let shifted = raw - self.zero_point as f64;
    if self.scale == 0.0 {
      shifted
    } else {
      self.scale * shifted
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  UInt8(Vec<u8>),
  Int8(Vec<i8>),
  Int32(Vec<i32>),
  Float32(Vec<f32>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::UInt8(v) => v.len(),
      TensorData::Int8(v) => v.len(),
      TensorData::Int32(v) => v.len(),
      TensorData::Float32(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn to_f64_vec(&self) -> Vec<f64> {
    match self {
      TensorData::UInt8(v) => v.iter().map(|&x| x as f64).collect(),
      TensorData::Int8(v) => v.iter().map(|&x| x as f64).collect(),
      TensorData::Int32(v) => v.iter().map(|&x| x as f64).collect(),
      TensorData::Float32(v) => v.iter().map(|&x| x as f64).collect(),
    }
  }
}

/// 推理引擎给出的原始输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct RawTensor {
  shape: Vec<usize>,
  data: TensorData,
}

impl RawTensor {
  pub fn new(shape: Vec<usize>, data: TensorData) -> Result<Self, TensorError> {
    let expected = shape.iter().product::<usize>();
    if expected != data.len() {
      return Err(TensorError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn uint8(shape: Vec<usize>, data: Vec<u8>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::UInt8(data))
  }

  pub fn float32(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
    Self::new(shape, TensorData::Float32(data))
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &TensorData {
    &self.data
  }
}

/// 解码后的浮点张量，已去除所有长度为 1 的维度
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTensor {
  values: ArrayD<f64>,
}

impl DecodedTensor {
  fn squeezed(shape: &[usize], values: Vec<f64>) -> Result<Self, TensorError> {
    let squeezed: Vec<usize> = shape.iter().copied().filter(|&d| d != 1).collect();
    let values = ArrayD::from_shape_vec(IxDyn(&squeezed), values)
      .map_err(|e| TensorError::Shape(e.to_string()))?;
    Ok(Self { values })
  }

  pub fn shape(&self) -> &[usize] {
    self.values.shape()
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// 按行优先顺序取第 `index` 个元素
  pub fn get(&self, index: usize) -> Option<f64> {
    self.values.iter().nth(index).copied()
  }

  pub fn to_vec(&self) -> Vec<f64> {
    self.values.iter().copied().collect()
  }

  pub fn as_array(&self) -> &ArrayD<f64> {
    &self.values
  }
}

/// 将原始输出张量解码为浮点张量；没有量化参数时原样转换
pub fn decode(
  raw: &RawTensor,
  quantization: Option<QuantizationParameters>,
) -> Result<DecodedTensor, TensorError> {
  let values = raw.data.to_f64_vec();
  let values = match quantization {
    None => values,
    Some(q) => values.into_iter().map(|v| q.dequantize(v)).collect(),
  };
  DecodedTensor::squeezed(&raw.shape, values)
}
