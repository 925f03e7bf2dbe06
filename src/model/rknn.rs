// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/rknn.rs - RKNN 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InferenceError, InputShape, Interpreter, OutputTensor},
  tensor::RawTensor,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_DEFAULT_INPUT_SIZE: u32 = 300;
const RKNN_CHANNELS: u32 = 3;

impl From<rknpu::Error> for InferenceError {
  fn from(err: rknpu::Error) -> Self {
    InferenceError::InvocationFailed(format!("RKNN 错误: {}", err))
  }
}

pub struct RknnInterpreterBuilder {
  model_path: String,
  device: Option<String>,
  input_shape: InputShape,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnInterpreterBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnInterpreterBuilder {
  type Error = InferenceError;

  /// `rknn:///path/model.rknn?width=300&height=300&device=0`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InferenceError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query: std::collections::HashMap<_, _> = url.query_pairs().collect();
    let dimension = |key: &str| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(RKNN_DEFAULT_INPUT_SIZE)
    };

    Ok(RknnInterpreterBuilder {
      model_path: crate::decoded_path(url),
      device: query.get("device").map(|v| v.to_string()),
      input_shape: InputShape {
        width: dimension("width"),
        height: dimension("height"),
        channels: RKNN_CHANNELS,
      },
      flags: InitFlags::default(),
    })
  }
}

impl RknnInterpreterBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<RknnInterpreter, InferenceError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );
    if let Some(device) = &self.device {
      warn!("RKNN 后端由运行时调度 NPU 核心, 忽略设备选择器: {}", device);
    }

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(InferenceError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    debug!("模型输出数量: {}", num_outputs);
    info!("模型加载完成");

    Ok(RknnInterpreter {
      context,
      input_shape: self.input_shape,
      num_outputs: num_outputs as usize,
      outputs: Vec::new(),
    })
  }
}

/// RKNN 运行时在输出时完成反量化，因此输出不携带量化参数
pub struct RknnInterpreter {
  context: Context,
  input_shape: InputShape,
  num_outputs: usize,
  outputs: Vec<Vec<f32>>,
}

impl Interpreter for RknnInterpreter {
  fn input_shape(&self) -> InputShape {
    self.input_shape
  }

  fn num_outputs(&self) -> usize {
    self.num_outputs
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
    self
      .context
      .set_input(0, data, TensorFormat::NHWC, TensorType::UInt8)?;
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), InferenceError> {
    self.context.run()?;
    let output = self.context.get_outputs()?;
    self.outputs = (0..self.num_outputs)
      .map(|i| output.get_f32(i).map(|data| data.to_vec()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(())
  }

  fn output(&self, index: usize) -> Result<OutputTensor, InferenceError> {
    let data = self
      .outputs
      .get(index)
      .ok_or(InferenceError::MissingOutput(index))?;
    Ok(OutputTensor {
      tensor: RawTensor::float32(vec![data.len()], data.clone())?,
      quantization: None,
    })
  }
}
