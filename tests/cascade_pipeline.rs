// 该文件是 Shanan （山南西风） 项目的一部分。
// tests/cascade_pipeline.rs - 级联推理端到端测试
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

use std::{cell::RefCell, rc::Rc};

use image::{Rgb, RgbImage};
use shanan_mask::{
  cascade::{Classification, FrameAnnotations, InferenceSession, SkipReason},
  config::CascadeConfig,
  crop::derive_crop,
  frame::RgbNhwcFrame,
  model::{
    BoundingBox, ClassificationResult, Classifier, Detection, Detector, InferenceError,
    InputShape, Interpreter, MaskLabel, Model, OutputTensor, ReplayInterpreter,
  },
  output::Render,
  task::{ContinuousTask, Task, Termination},
  tensor::{QuantizationParameters, RawTensor},
};

const RGB: u32 = 3;

fn float_output(shape: Vec<usize>, data: Vec<f32>) -> OutputTensor {
  OutputTensor {
    tensor: RawTensor::float32(shape, data).unwrap(),
    quantization: None,
  }
}

/// 以 `[ymin, xmin, ymax, xmax]` 行、分数与类别录制检测模型输出
fn detector(
  rows: &[[f32; 4]],
  scores: &[f32],
  config: CascadeConfig,
) -> Detector<ReplayInterpreter> {
  let n = rows.len();
  let outputs = vec![
    float_output(vec![1, n, 4], rows.iter().flatten().copied().collect()),
    float_output(vec![1, n], vec![0.0; n]),
    float_output(vec![1, n], scores.to_vec()),
    float_output(vec![1], vec![n as f32]),
  ];
  let interpreter = ReplayInterpreter::new(
    InputShape {
      width: 8,
      height: 8,
      channels: RGB,
    },
    outputs,
  );
  Detector::new(interpreter, config).unwrap()
}

/// 按输入图像的平均红、绿分量给出两类分数
struct MeanColorInterpreter {
  input: Vec<u8>,
  scores: Vec<f32>,
}

impl MeanColorInterpreter {
  fn new() -> Self {
    Self {
      input: Vec::new(),
      scores: Vec::new(),
    }
  }
}

impl Interpreter for MeanColorInterpreter {
  fn input_shape(&self) -> InputShape {
    InputShape {
      width: 4,
      height: 4,
      channels: RGB,
    }
  }

  fn num_outputs(&self) -> usize {
    1
  }

  fn set_input(&mut self, data: &[u8]) -> Result<(), InferenceError> {
    self.input = data.to_vec();
    Ok(())
  }

  fn invoke(&mut self) -> Result<(), InferenceError> {
    let pixels = (self.input.len() / 3) as f32;
    let mean = |c: usize| {
      self.input.iter().skip(c).step_by(3).map(|&v| v as f32).sum::<f32>() / pixels / 255.0
    };
    self.scores = vec![mean(0), mean(1)];
    Ok(())
  }

  fn output(&self, index: usize) -> Result<OutputTensor, InferenceError> {
    if index != 0 {
      return Err(InferenceError::MissingOutput(index));
    }
    Ok(float_output(vec![1, 2], self.scores.clone()))
  }
}

#[derive(Clone, Default)]
struct Recorder {
  frames: Rc<RefCell<Vec<FrameAnnotations>>>,
}

impl Render<RgbNhwcFrame, FrameAnnotations> for Recorder {
  type Error = std::io::Error;

  fn render_result(
    &self,
    _frame: &mut RgbNhwcFrame,
    result: &FrameAnnotations,
  ) -> Result<(), Self::Error> {
    self.frames.borrow_mut().push(result.clone());
    Ok(())
  }
}

/// 左半边偏红（戴口罩），右半边偏绿（未戴口罩）
fn split_frame() -> RgbNhwcFrame {
  RgbNhwcFrame::from(RgbImage::from_fn(100, 100, |x, _| {
    if x < 50 {
      Rgb([200, 50, 0])
    } else {
      Rgb([50, 200, 0])
    }
  }))
}

const ROWS: [[f32; 4]; 3] = [
  [0.1, 0.1, 0.5, 0.4],
  [0.1, 0.6, 0.5, 0.9],
  [0.3, 0.3, 0.6, 0.3049],
];
const SCORES: [f32; 3] = [0.9, 0.8, 0.6];

fn config(threshold: f64, top_k: usize) -> CascadeConfig {
  CascadeConfig::default()
    .with_score_threshold(threshold)
    .with_top_k(top_k)
}

#[test]
fn scenario_a_threshold_filters_second_row() {
  let mut detector = detector(
    &[[0.1, 0.1, 0.5, 0.5], [0.2, 0.2, 0.4, 0.4]],
    &[0.9, 0.05],
    config(0.1, 2),
  );
  let detections = detector.infer(&RgbNhwcFrame::with_shape(48, 64)).unwrap();

  assert_eq!(detections.len(), 1);
  assert!((detections[0].score - 0.9).abs() < 1e-6);
  assert!((detections[0].bbox.xmin - 0.1).abs() < 1e-6);
  assert!((detections[0].bbox.xmax - 0.5).abs() < 1e-6);
}

#[test]
fn scenario_a_quantized_scores() {
  let boxes = vec![0u8, 0, 128, 128, 0, 0, 64, 64];
  let outputs = vec![
    OutputTensor {
      tensor: RawTensor::uint8(vec![1, 2, 4], boxes).unwrap(),
      quantization: Some(QuantizationParameters::new(1.0 / 128.0, 0).unwrap()),
    },
    float_output(vec![1, 2], vec![0.0, 0.0]),
    OutputTensor {
      tensor: RawTensor::uint8(vec![1, 2], vec![230, 13]).unwrap(),
      quantization: Some(QuantizationParameters::new(1.0 / 256.0, 0).unwrap()),
    },
    float_output(vec![1], vec![2.0]),
  ];
  let interpreter = ReplayInterpreter::new(
    InputShape {
      width: 8,
      height: 8,
      channels: RGB,
    },
    outputs,
  );
  let mut detector = Detector::new(interpreter, config(0.1, 2)).unwrap();
  let detections = detector.infer(&RgbNhwcFrame::with_shape(8, 8)).unwrap();

  assert_eq!(detections.len(), 1);
  assert_eq!(detections[0].score, 230.0 / 256.0);
  assert_eq!(detections[0].bbox, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
}

#[test]
fn scenario_b_crop_rectangle() {
  let frame = RgbNhwcFrame::with_shape(480, 640);
  let crop = derive_crop(&frame, &BoundingBox::new(0.1, 0.1, 0.5, 0.5)).unwrap();
  assert_eq!(
    (crop.rect.x0, crop.rect.y0, crop.rect.x1, crop.rect.y1),
    (64, 48, 320, 240)
  );
  assert_eq!((crop.image.width(), crop.image.height()), (256, 192));
}

#[test]
fn scenario_c_classifier_decision() {
  let interpreter = ReplayInterpreter::new(
    InputShape {
      width: 4,
      height: 4,
      channels: RGB,
    },
    vec![float_output(vec![1, 2], vec![0.7, 0.3])],
  );
  let mut classifier = Classifier::new(interpreter).unwrap();
  let result = classifier.infer(&RgbNhwcFrame::with_shape(10, 10)).unwrap();

  assert_eq!(result.label(), MaskLabel::Mask);
  assert!((result.confidence() - 70.0).abs() < 1e-4);
  assert_eq!(result.caption(64, 48), "Mask (64,48): 70.00%");
}

#[test]
fn scenario_d_degenerate_crop_is_skipped() {
  let mut session = InferenceSession::new(
    detector(&ROWS, &SCORES, config(0.5, 3)),
    Classifier::new(MeanColorInterpreter::new()).unwrap(),
  );
  let annotations = session.infer(&split_frame()).unwrap();

  assert_eq!(annotations.detections.len(), 3);
  assert_eq!(annotations.classifications.len(), 3);
  assert_eq!(annotations.classifications.get(0).unwrap().label(), MaskLabel::Mask);
  assert_eq!(
    annotations.classifications.get(1).unwrap().label(),
    MaskLabel::NoMask
  );
  assert!(annotations.classifications.get(2).is_none());
  assert!(matches!(
    annotations.classifications.slot(2),
    Some(Classification::Skipped {
      reason: SkipReason::DegenerateCrop,
      ..
    })
  ));
  assert_eq!(annotations.classifications.skipped_indices(), vec![2]);
}

#[test]
fn cascade_results_match_isolated_classification() {
  let frame = split_frame();
  let mut session = InferenceSession::new(
    detector(&ROWS, &SCORES, config(0.5, 3)),
    Classifier::new(MeanColorInterpreter::new()).unwrap(),
  );
  let annotations = session.infer(&frame).unwrap();
  let (_, mut classifier) = session.into_parts();

  for (j, _, result) in annotations.classifications.classified() {
    let crop = derive_crop(&frame, &annotations.detections[j].bbox).unwrap();
    let alone: ClassificationResult = classifier.infer(&crop.image).unwrap();
    assert_eq!(*result, alone);
  }
}

#[test]
fn task_runs_every_frame_through_the_cascade() {
  let recorder = Recorder::default();
  let session = InferenceSession::new(
    detector(&ROWS, &SCORES, config(0.5, 3)),
    Classifier::new(MeanColorInterpreter::new()).unwrap(),
  );
  let frames = vec![split_frame(), split_frame()];

  let report = ContinuousTask::default()
    .run_task(frames.into_iter(), session, recorder.clone())
    .unwrap();

  assert_eq!(report.frames, 2);
  assert_eq!(report.detections, 6);
  assert_eq!(report.classified, 4);
  assert_eq!(report.skipped, 2);
  assert_eq!(report.negatives, 2);
  assert_eq!(report.failed_frames, 0);
  assert_eq!(report.termination, Some(Termination::EndOfStream));

  let rendered = recorder.frames.borrow();
  assert_eq!(rendered.len(), 2);
  let detections: &Vec<Detection> = &rendered[1].detections;
  assert_eq!(detections.len(), 3);
}

#[test]
fn top_k_beyond_capacity_aborts_the_task() {
  let session = InferenceSession::new(
    detector(&ROWS, &SCORES, config(0.5, 10)),
    Classifier::new(MeanColorInterpreter::new()).unwrap(),
  );
  let result = ContinuousTask::default().run_task(
    vec![split_frame()].into_iter(),
    session,
    Recorder::default(),
  );
  assert!(result.is_err());
}

#[cfg(feature = "directory_record")]
#[test]
fn folder_output_renders_skipped_detections_without_error() {
  use shanan_mask::{FromUrl, output::DirectoryRecordOutput};

  let dir = tempfile::tempdir().unwrap();
  let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
  let output = DirectoryRecordOutput::from_url(&url).unwrap();
  let session = InferenceSession::new(
    detector(&ROWS, &SCORES, config(0.5, 3)),
    Classifier::new(MeanColorInterpreter::new()).unwrap(),
  );

  let report = ContinuousTask::default()
    .run_task(vec![split_frame()].into_iter(), session, output)
    .unwrap();
  assert_eq!(report.render_failures, 0);
  assert_eq!(report.skipped, 1);
}
