// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbNhwcFrame,
  tensor::{DecodedTensor, QuantizationParameters, RawTensor, TensorError, decode},
};

/// 模型输入尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  pub channels: u32,
}

/// 一个输出张量及其量化参数（若有）
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  pub tensor: RawTensor,
  pub quantization: Option<QuantizationParameters>,
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("推理调用失败: {0}")]
  InvocationFailed(String),
  #[error("缺少第 {0} 个输出")]
  MissingOutput(usize),
  #[error("输出形状不符合预期: {0}")]
  UnexpectedOutput(String),
  #[error("输入数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  InputSizeMismatch { expected: usize, actual: usize },
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("检测结果提取错误: {0}")]
  ExtractError(#[from] ExtractError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("推理后端 '{scheme}' 未编译，请启用 `{feature}` 特性重新构建")]
  BackendDisabled {
    scheme: &'static str,
    feature: &'static str,
  },
}

/// 推理错误是否应当终止整个任务，而不是仅跳过当前帧
pub trait ModelError: std::error::Error + Send + Sync + 'static {
  fn is_fatal(&self) -> bool {
    false
  }
}

impl ModelError for InferenceError {
  fn is_fatal(&self) -> bool {
    matches!(
      self,
      InferenceError::ExtractError(ExtractError::TopKExceedsCapacity { .. })
    )
  }
}

/// 推理引擎。同一个实例只能被一个调用者独占使用，所以所有推理相关方法都需要 `&mut self`。
pub trait Interpreter {
  fn input_shape(&self) -> InputShape;
  fn num_outputs(&self) -> usize;
  fn set_input(&mut self, data: &[u8]) -> Result<(), InferenceError>;
  /// 阻塞直至输出可用
  fn invoke(&mut self) -> Result<(), InferenceError>;
  fn output(&self, index: usize) -> Result<OutputTensor, InferenceError>;
}

impl<T: Interpreter + ?Sized> Interpreter for Box<T> {
  fn input_shape(&self) -> InputShape {
    (**self).input_shape()
  }

  fn num_outputs(&self) -> usize {
    (**self).num_outputs()
  }

  fn set_input(&mut self, data: &[u8]) -> Result<(), InferenceError> {
    (**self).set_input(data)
  }

  fn invoke(&mut self) -> Result<(), InferenceError> {
    (**self).invoke()
  }

  fn output(&self, index: usize) -> Result<OutputTensor, InferenceError> {
    (**self).output(index)
  }
}

/// 将帧最近邻缩放到模型输入尺寸后写入推理引擎
pub(crate) fn feed_frame<I: Interpreter + ?Sized>(
  interpreter: &mut I,
  frame: &RgbNhwcFrame,
) -> Result<(), InferenceError> {
  let shape = interpreter.input_shape();
  let resized = frame.resize_nearest(shape.width, shape.height);
  debug!(
    "输入缩放: {}x{} -> {}x{}",
    frame.width(),
    frame.height(),
    shape.width,
    shape.height
  );
  interpreter.set_input(resized.as_nhwc())
}

/// 读取并解码第 `index` 个输出
pub(crate) fn decoded_output<I: Interpreter + ?Sized>(
  interpreter: &I,
  index: usize,
) -> Result<DecodedTensor, InferenceError> {
  let OutputTensor {
    tensor,
    quantization,
  } = interpreter.output(index)?;
  Ok(decode(&tensor, quantization)?)
}

/// 检查推理引擎是否接受 RGB 输入并提供足够多的输出
pub(crate) fn check_interpreter<I: Interpreter + ?Sized>(
  interpreter: &I,
  min_outputs: usize,
) -> Result<(), InferenceError> {
  let shape = interpreter.input_shape();
  if shape.channels != 3 || shape.width == 0 || shape.height == 0 {
    return Err(InferenceError::ModelInvalid(format!(
      "模型输入必须为非空 RGB 图像, 实际为 {}x{}x{}",
      shape.width, shape.height, shape.channels
    )));
  }
  let num_outputs = interpreter.num_outputs();
  if num_outputs < min_outputs {
    error!("预期模型输出数量至少为 {}, 实际为 {}", min_outputs, num_outputs);
    return Err(InferenceError::ModelInvalid(format!(
      "预期模型输出数量至少为 {}, 实际为 {}",
      min_outputs, num_outputs
    )));
  }
  Ok(())
}

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 模型文件路径，可带 `@设备` 后缀选择加速设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelLocator {
  pub path: String,
  pub device: Option<String>,
}

impl ModelLocator {
  pub fn parse(locator: &str) -> Result<Self, InferenceError> {
    let (path, device) = match locator.split_once('@') {
      Some((path, device)) => (path, Some(device.to_string())),
      None => (locator, None),
    };
    if path.is_empty() {
      return Err(InferenceError::ModelPathError(format!(
        "模型路径为空: {:?}",
        locator
      )));
    }
    if matches!(device.as_deref(), Some("")) {
      return Err(InferenceError::ModelPathError(format!(
        "设备选择器为空: {:?}",
        locator
      )));
    }
    Ok(Self {
      path: path.to_string(),
      device,
    })
  }

  /// 已是 URL 时原样使用，否则按 `path[@device]` 解析
  pub fn resolve(model: &str) -> Result<Url, InferenceError> {
    if model.contains("://") {
      return Url::parse(model).map_err(|e| InferenceError::ModelPathError(e.to_string()));
    }
    Self::parse(model)?.to_url()
  }

  /// 按文件扩展名选择推理后端并转换为模型 URL
  pub fn to_url(&self) -> Result<Url, InferenceError> {
    let absolute = std::path::absolute(&self.path)?;
    let scheme = match absolute.extension().and_then(|e| e.to_str()) {
      Some("rknn") => "rknn",
      Some("json") => ReplayInterpreter::SCHEME,
      _ => {
        return Err(InferenceError::ModelPathError(format!(
          "无法识别的模型文件类型: {}",
          self.path
        )));
      }
    };
    let mut url = Url::parse(&format!("{}://", scheme))
      .map_err(|e| InferenceError::ModelPathError(e.to_string()))?;
    url.set_path(&absolute.to_string_lossy());
    if let Some(device) = &self.device {
      url.query_pairs_mut().append_pair("device", device);
    }
    Ok(url)
  }
}

/// 按 URL 方案选择推理后端
pub enum InterpreterWrapper {
  Replay(ReplayInterpreter),
  #[cfg(feature = "rknpu")]
  Rknn(RknnInterpreter),
}

impl FromUrl for InterpreterWrapper {
  type Error = InferenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayInterpreter::SCHEME => Ok(InterpreterWrapper::Replay(ReplayInterpreter::from_url(
        url,
      )?)),
      #[cfg(feature = "rknpu")]
      RknnInterpreterBuilder::SCHEME => Ok(InterpreterWrapper::Rknn(
        RknnInterpreterBuilder::from_url(url)?.build()?,
      )),
      #[cfg(not(feature = "rknpu"))]
      "rknn" => Err(InferenceError::BackendDisabled {
        scheme: "rknn",
        feature: "rknpu",
      }),
      other => Err(InferenceError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Interpreter for InterpreterWrapper {
  fn input_shape(&self) -> InputShape {
    match self {
      InterpreterWrapper::Replay(i) => i.input_shape(),
      #[cfg(feature = "rknpu")]
      InterpreterWrapper::Rknn(i) => i.input_shape(),
    }
  }

  fn num_outputs(&self) -> usize {
    match self {
      InterpreterWrapper::Replay(i) => i.num_outputs(),
      #[cfg(feature = "rknpu")]
      InterpreterWrapper::Rknn(i) => i.num_outputs(),
    }
  }

  fn set_input(&mut self, data: &[u8]) -> Result<(), InferenceError> {
    match self {
      InterpreterWrapper::Replay(i) => i.set_input(data),
      #[cfg(feature = "rknpu")]
      InterpreterWrapper::Rknn(i) => i.set_input(data),
    }
  }

  fn invoke(&mut self) -> Result<(), InferenceError> {
    match self {
      InterpreterWrapper::Replay(i) => i.invoke(),
      #[cfg(feature = "rknpu")]
      InterpreterWrapper::Rknn(i) => i.invoke(),
    }
  }

  fn output(&self, index: usize) -> Result<OutputTensor, InferenceError> {
    match self {
      InterpreterWrapper::Replay(i) => i.output(index),
      #[cfg(feature = "rknpu")]
      InterpreterWrapper::Rknn(i) => i.output(index),
    }
  }
}

mod classifier;
mod detector;
mod replay;
#[cfg(feature = "rknpu")]
mod rknn;

pub use self::classifier::{ClassificationResult, Classifier, MaskLabel};
pub use self::detector::{BoundingBox, Detection, Detector, DetectorOutputs, ExtractError, extract};
pub use self::replay::ReplayInterpreter;
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnInterpreter, RknnInterpreterBuilder};
