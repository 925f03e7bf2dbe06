// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 逐帧任务循环
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

use std::{
  fmt::Display,
  sync::{Arc, mpsc},
  thread,
  time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
  cascade::{FrameAnnotations, InferenceSession},
  frame::RgbNhwcFrame,
  label::Labels,
  model::{ClassificationResult, Detection, Model, ModelError},
  output::Render,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<TaskReport, Self::Error>;
}

/// 单帧处理所处的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Idle,
  Capturing,
  Detecting,
  Classifying,
  Rendering,
  Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
  /// 输入源耗尽或采集失败
  EndOfStream,
  /// 收到退出信号
  Cancelled,
  /// 达到指定帧数
  FrameLimit,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskReport {
  pub frames: usize,
  pub detections: usize,
  pub classified: usize,
  pub skipped: usize,
  pub negatives: usize,
  pub failed_frames: usize,
  pub render_failures: usize,
  pub termination: Option<Termination>,
}

/// 连续处理输入帧，直到输入结束、达到帧数或收到退出信号
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  cancel: Option<mpsc::Receiver<()>>,
  labels: Option<Arc<Labels>>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 每完成一帧检查一次该通道
  pub fn with_cancel(mut self, cancel: mpsc::Receiver<()>) -> Self {
    self.cancel = Some(cancel);
    self
  }

  pub fn with_labels(mut self, labels: Arc<Labels>) -> Self {
    self.labels = Some(labels);
    self
  }

  fn class_name(&self, class_id: u32) -> String {
    match &self.labels {
      Some(labels) => labels.name_or_id(class_id).into_owned(),
      None => class_id.to_string(),
    }
  }

  fn cancelled(&self) -> bool {
    self
      .cancel
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }
}

fn enter(stage: &mut Stage, next: Stage) {
  debug!("阶段切换: {:?} -> {:?}", stage, next);
  *stage = next;
}

impl<I, D, C, O> Task<I, InferenceSession<D, C>, O> for ContinuousTask
where
  I: Iterator<Item = RgbNhwcFrame>,
  D: Model<Input = RgbNhwcFrame, Output = Vec<Detection>>,
  D::Error: ModelError,
  C: Model<Input = RgbNhwcFrame, Output = ClassificationResult>,
  C::Error: Display,
  O: Render<RgbNhwcFrame, FrameAnnotations>,
  O::Error: Display,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    mut input: I,
    mut session: InferenceSession<D, C>,
    output: O,
  ) -> Result<TaskReport, Self::Error> {
    info!("开始任务...");
    let mut report = TaskReport::default();
    let mut stage = Stage::Idle;

    let termination = loop {
      enter(&mut stage, Stage::Capturing);
      let Some(mut frame) = input.next() else {
        info!("输入结束，退出任务循环");
        break Termination::EndOfStream;
      };
      report.frames += 1;
      let frame_index = report.frames;
      let now = Instant::now();

      enter(&mut stage, Stage::Detecting);
      match session.detect(&frame) {
        Ok(detections) => {
          for (i, d) in detections.iter().enumerate() {
            debug!(
              "帧 {} 检测 {}: {} {:.2}% {:?}",
              frame_index,
              i,
              self.class_name(d.class_id),
              d.score * 100.0,
              d.bbox
            );
          }

          enter(&mut stage, Stage::Classifying);
          let classifications = session.classify(&frame, &detections);
          let elapsed_a = now.elapsed();
          for (j, rect, result) in classifications.classified() {
            debug!("帧 {} 检测 {}: {}", frame_index, j, result.caption(rect.x0, rect.y0));
          }

          report.detections += detections.len();
          report.classified += classifications.classified().count();
          report.skipped += classifications.skipped_indices().len();
          let negatives = classifications.negatives();
          report.negatives += negatives;

          enter(&mut stage, Stage::Rendering);
          let annotations = FrameAnnotations {
            detections,
            classifications,
          };
          if let Err(e) = output.render_result(&mut frame, &annotations) {
            warn!("第 {} 帧渲染失败: {}", frame_index, e);
            report.render_failures += 1;
          }
          let elapsed_b = now.elapsed();
          info!(
            "第 {} 帧: {} 个检测, {} 个未佩戴口罩, 耗时: {:.2?} / {:.2?}",
            frame_index,
            annotations.detections.len(),
            negatives,
            elapsed_a,
            elapsed_b
          );
        }
        Err(e) if e.is_fatal() => {
          error!("第 {} 帧检测出现不可恢复的错误: {}", frame_index, e);
          return Err(e.into());
        }
        Err(e) => {
          warn!("第 {} 帧检测失败，跳过: {}", frame_index, e);
          report.failed_frames += 1;
        }
      }

      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break Termination::FrameLimit;
      }
      if self.cancelled() {
        warn!("中断信号接收，退出任务循环");
        break Termination::Cancelled;
      }
    };

    enter(&mut stage, Stage::Terminated);
    report.termination = Some(termination);
    info!("任务完成，退出");
    Ok(report)
  }
}

/// 安装 Ctrl-C 处理器，返回在收到信号时得到通知的通道
pub fn ctrlc_channel() -> Result<mpsc::Receiver<()>, ctrlc::Error> {
  let (tx, rx) = mpsc::channel();

  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  Ok(rx)
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;
  use crate::model::{BoundingBox, InferenceError};

  struct ScriptedDetector {
    frames: Vec<Result<Vec<Detection>, InferenceError>>,
  }

  impl Model for ScriptedDetector {
    type Input = RgbNhwcFrame;
    type Output = Vec<Detection>;
    type Error = InferenceError;

    fn infer(&mut self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      self.frames.remove(0)
    }
  }

  struct ConstClassifier(ClassificationResult);

  impl Model for ConstClassifier {
    type Input = RgbNhwcFrame;
    type Output = ClassificationResult;
    type Error = InferenceError;

    fn infer(&mut self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
      Ok(self.0)
    }
  }

  #[derive(Clone, Default)]
  struct Recorder {
    rendered: Rc<RefCell<Vec<FrameAnnotations>>>,
  }

  impl Render<RgbNhwcFrame, FrameAnnotations> for Recorder {
    type Error = std::io::Error;

    fn render_result(
      &self,
      _frame: &mut RgbNhwcFrame,
      result: &FrameAnnotations,
    ) -> Result<(), Self::Error> {
      self.rendered.borrow_mut().push(result.clone());
      Ok(())
    }
  }

  fn face() -> Detection {
    Detection {
      class_id: 0,
      score: 0.9,
      bbox: BoundingBox::new(0.1, 0.1, 0.5, 0.5),
    }
  }

  fn frames(n: usize) -> impl Iterator<Item = RgbNhwcFrame> {
    (0..n).map(|_| RgbNhwcFrame::with_shape(48, 64))
  }

  fn session(
    frames: Vec<Result<Vec<Detection>, InferenceError>>,
  ) -> InferenceSession<ScriptedDetector, ConstClassifier> {
    InferenceSession::new(
      ScriptedDetector { frames },
      ConstClassifier(ClassificationResult {
        mask_score: 0.2,
        without_mask_score: 0.8,
      }),
    )
  }

  #[test]
  fn runs_until_input_ends() {
    let recorder = Recorder::default();
    let report = ContinuousTask::default()
      .run_task(
        frames(2),
        session(vec![Ok(vec![face()]), Ok(vec![face(), face()])]),
        recorder.clone(),
      )
      .unwrap();

    assert_eq!(report.frames, 2);
    assert_eq!(report.detections, 3);
    assert_eq!(report.classified, 3);
    assert_eq!(report.negatives, 3);
    assert_eq!(report.termination, Some(Termination::EndOfStream));
    assert_eq!(recorder.rendered.borrow().len(), 2);
  }

  #[test]
  fn detector_failure_skips_only_that_frame() {
    let recorder = Recorder::default();
    let report = ContinuousTask::default()
      .run_task(
        frames(3),
        session(vec![
          Ok(vec![face()]),
          Err(InferenceError::InvocationFailed("npu busy".into())),
          Ok(vec![]),
        ]),
        recorder.clone(),
      )
      .unwrap();

    assert_eq!(report.frames, 3);
    assert_eq!(report.failed_frames, 1);
    assert_eq!(recorder.rendered.borrow().len(), 2);
  }

  #[test]
  fn fatal_detector_error_aborts() {
    let result = ContinuousTask::default().run_task(
      frames(2),
      session(vec![
        Err(InferenceError::from(
          crate::model::ExtractError::TopKExceedsCapacity {
            top_k: 50,
            capacity: 10,
          },
        )),
        Ok(vec![]),
      ]),
      Recorder::default(),
    );
    assert!(result.is_err());
  }

  #[test]
  fn stops_at_frame_number() {
    let report = ContinuousTask::default()
      .with_frame_number(Some(2))
      .run_task(
        frames(5),
        session(vec![Ok(vec![]), Ok(vec![]), Ok(vec![])]),
        Recorder::default(),
      )
      .unwrap();
    assert_eq!(report.frames, 2);
    assert_eq!(report.termination, Some(Termination::FrameLimit));
  }

  #[test]
  fn cancellation_takes_effect_after_current_frame() {
    let (tx, rx) = mpsc::channel();
    tx.send(()).unwrap();
    let recorder = Recorder::default();
    let report = ContinuousTask::default()
      .with_cancel(rx)
      .run_task(
        frames(5),
        session(vec![Ok(vec![face()]), Ok(vec![])]),
        recorder.clone(),
      )
      .unwrap();
    assert_eq!(report.frames, 1);
    assert_eq!(recorder.rendered.borrow().len(), 1);
    assert_eq!(report.termination, Some(Termination::Cancelled));
  }
}
