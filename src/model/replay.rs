// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/replay.rs - 回放推理后端
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

//! 不依赖硬件的推理后端：每次推理都返回预先录制的输出张量。
//!
//! 录制文件为 JSON，`replay:///path/to/outputs.json`：
//!
//! ```json
//! {
//!   "input": { "width": 224, "height": 224, "channels": 3 },
//!   "outputs": [
//!     {
//!       "shape": [1, 2],
//!       "dtype": "uint8",
//!       "data": [180, 76],
//!       "quantization": { "scale": 0.00390625, "zero_point": 0 }
//!     }
//!   ]
//! }
//! ```
//!
//! `dtype` 可取 `uint8`、`int8`、`int32`、`float32`，省略 `quantization` 表示输出已是浮点值。

use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceError, InputShape, Interpreter, OutputTensor},
  tensor::{QuantizationParameters, RawTensor, TensorData},
};

#[derive(Deserialize)]
struct Recording {
  input: RecordedInput,
  outputs: Vec<RecordedOutput>,
}

#[derive(Deserialize)]
struct RecordedInput {
  width: u32,
  height: u32,
  channels: u32,
}

#[derive(Deserialize)]
struct RecordedOutput {
  shape: Vec<usize>,
  #[serde(flatten)]
  data: RecordedData,
  #[serde(default)]
  quantization: Option<RecordedQuantization>,
}

#[derive(Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
enum RecordedData {
  UInt8(Vec<u8>),
  Int8(Vec<i8>),
  Int32(Vec<i32>),
  Float32(Vec<f32>),
}

#[derive(Deserialize)]
struct RecordedQuantization {
  scale: f64,
  zero_point: i64,
}

impl From<RecordedData> for TensorData {
  fn from(data: RecordedData) -> Self {
    match data {
      RecordedData::UInt8(v) => TensorData::UInt8(v),
      RecordedData::Int8(v) => TensorData::Int8(v),
      RecordedData::Int32(v) => TensorData::Int32(v),
      RecordedData::Float32(v) => TensorData::Float32(v),
    }
  }
}

impl TryFrom<RecordedOutput> for OutputTensor {
  type Error = InferenceError;

  fn try_from(output: RecordedOutput) -> Result<Self, Self::Error> {
    let quantization = output
      .quantization
      .map(|q| QuantizationParameters::new(q.scale, q.zero_point))
      .transpose()?;
    Ok(OutputTensor {
      tensor: RawTensor::new(output.shape, output.data.into())?,
      quantization,
    })
  }
}

pub struct ReplayInterpreter {
  input_shape: InputShape,
  outputs: Vec<OutputTensor>,
  input_ready: bool,
  invocations: usize,
}

impl ReplayInterpreter {
  pub fn new(input_shape: InputShape, outputs: Vec<OutputTensor>) -> Self {
    Self {
      input_shape,
      outputs,
      input_ready: false,
      invocations: 0,
    }
  }

  /// 已执行的推理次数
  pub fn invocations(&self) -> usize {
    self.invocations
  }

  pub fn from_json(text: &str) -> Result<Self, InferenceError> {
    let recording: Recording = serde_json::from_str(text)
      .map_err(|e| InferenceError::ModelInvalid(format!("回放文件解析失败: {}", e)))?;

    let RecordedInput {
      width,
      height,
      channels,
    } = recording.input;
    let outputs = recording
      .outputs
      .into_iter()
      .map(OutputTensor::try_from)
      .collect::<Result<Vec<_>, _>>()?;

    Ok(Self::new(
      InputShape {
        width,
        height,
        channels,
      },
      outputs,
    ))
  }
}

impl FromUrlWithScheme for ReplayInterpreter {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayInterpreter {
  type Error = InferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InferenceError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let path = crate::decoded_path(url);
    info!("加载回放文件: {}", path);
    let text = std::fs::read_to_string(&path)?;
    let interpreter = Self::from_json(&text)?;
    debug!("回放输出数量: {}", interpreter.outputs.len());
    Ok(interpreter)
  }
}

impl Interpreter for ReplayInterpreter {
  fn input_shape(&self) -> InputShape {
    self.input_shape
  }

  fn num_outputs(&self) -> usize {
    self.outputs.len()
  }

  fn set_input(&mut self, data: &[u8]) -> Result<(), InferenceError> {
    let shape = self.input_shape;
    let expected = (shape.width * shape.height * shape.channels) as usize;
    if data.len() != expected {
      return Err(InferenceError::InputSizeMismatch {
        expected,
        actual: data.len(),
      });
    }
    self.input_ready = true;
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), InferenceError> {
    if !self.input_ready {
      return Err(InferenceError::InvocationFailed("尚未设置输入".to_string()));
    }
    self.invocations += 1;
    Ok(())
  }

  fn output(&self, index: usize) -> Result<OutputTensor, InferenceError> {
    if self.invocations == 0 {
      return Err(InferenceError::InvocationFailed("尚未执行推理".to_string()));
    }
    self
      .outputs
      .get(index)
      .cloned()
      .ok_or(InferenceError::MissingOutput(index))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::decode;

  const CLASSIFIER_JSON: &str = r#"{
    "input": { "width": 4, "height": 4, "channels": 3 },
    "outputs": [
      {
        "shape": [1, 2],
        "dtype": "uint8",
        "data": [192, 64],
        "quantization": { "scale": 0.00390625, "zero_point": 0 }
      }
    ]
  }"#;

  #[test]
  fn parses_recording() {
    let interpreter = ReplayInterpreter::from_json(CLASSIFIER_JSON).unwrap();
    assert_eq!(
      interpreter.input_shape(),
      InputShape {
        width: 4,
        height: 4,
        channels: 3
      }
    );
    assert_eq!(interpreter.num_outputs(), 1);
  }

  #[test]
  fn replays_after_invoke() {
    let mut interpreter = ReplayInterpreter::from_json(CLASSIFIER_JSON).unwrap();
    assert!(interpreter.output(0).is_err());
    interpreter.set_input(&[0u8; 48]).unwrap();
    interpreter.invoke().unwrap();
    let output = interpreter.output(0).unwrap();
    let decoded = decode(&output.tensor, output.quantization).unwrap();
    assert_eq!(decoded.to_vec(), vec![0.75, 0.25]);
    assert_eq!(interpreter.invocations(), 1);
    assert!(matches!(
      interpreter.output(1),
      Err(InferenceError::MissingOutput(1))
    ));
  }

  #[test]
  fn rejects_wrong_input_size() {
    let mut interpreter = ReplayInterpreter::from_json(CLASSIFIER_JSON).unwrap();
    assert!(matches!(
      interpreter.set_input(&[0u8; 10]),
      Err(InferenceError::InputSizeMismatch {
        expected: 48,
        actual: 10
      })
    ));
  }

  #[test]
  fn rejects_out_of_range_values() {
    let json = r#"{
      "input": { "width": 1, "height": 1, "channels": 3 },
      "outputs": [{ "shape": [1], "dtype": "uint8", "data": [300] }]
    }"#;
    assert!(ReplayInterpreter::from_json(json).is_err());
  }

  #[test]
  fn rejects_negative_scale() {
    let json = r#"{
      "input": { "width": 1, "height": 1, "channels": 3 },
      "outputs": [{ "shape": [1], "dtype": "uint8", "data": [3],
                    "quantization": { "scale": -1.0, "zero_point": 0 } }]
    }"#;
    assert!(matches!(
      ReplayInterpreter::from_json(json),
      Err(InferenceError::TensorError(_))
    ));
  }

  #[test]
  fn unknown_dtype_is_invalid() {
    let json = r#"{
      "input": { "width": 1, "height": 1, "channels": 3 },
      "outputs": [{ "shape": [1], "dtype": "float16", "data": [1.0] }]
    }"#;
    assert!(matches!(
      ReplayInterpreter::from_json(json),
      Err(InferenceError::ModelInvalid(_))
    ));
  }

  #[test]
  fn shape_must_match_data_length() {
    let json = r#"{
      "input": { "width": 1, "height": 1, "channels": 3 },
      "outputs": [{ "shape": [1, 3], "dtype": "float32", "data": [0.5, 0.5] }]
    }"#;
    assert!(matches!(
      ReplayInterpreter::from_json(json),
      Err(InferenceError::TensorError(_))
    ));
  }
}
