// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use shanan_mask::{
  FromUrl,
  cascade::InferenceSession,
  input::{GStreamerInputPipelineBuilder, InputWrapper},
  label::load_labels,
  model::{Classifier, Detector, InterpreterWrapper, ModelLocator},
  output::OutputWrapper,
  task::{ContinuousTask, Task, ctrlc_channel},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.cascade_config();
  config.validate()?;

  let input_url = match &args.input {
    Some(url) => url.clone(),
    None => GStreamerInputPipelineBuilder::camera_url(args.camera_idx)?,
  };
  info!("检测模型: {}", args.model);
  info!("分类模型: {}", args.model2);
  info!("输入来源: {}", input_url);
  info!("输出路径: {}", args.output);
  info!(
    "分数阈值: {}, top-k: {}, respect-count: {}",
    config.score_threshold, config.top_k, config.respect_count
  );

  let labels = Arc::new(load_labels(&args.labels)?);
  info!("加载标签 {} 个", labels.len());

  let detector_url = ModelLocator::resolve(&args.model)?;
  let classifier_url = ModelLocator::resolve(&args.model2)?;
  let detector = Detector::new(InterpreterWrapper::from_url(&detector_url)?, config)?;
  let classifier = Classifier::new(InterpreterWrapper::from_url(&classifier_url)?)?;
  let session = InferenceSession::new(detector, classifier);

  let input = InputWrapper::from_url(&input_url)?;
  let output = OutputWrapper::from_url(&args.output)?.with_labels(labels.clone());

  let report = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_cancel(ctrlc_channel()?)
    .with_labels(labels)
    .run_task(input.into_nhwc(), session, output)?;

  info!(
    "共处理 {} 帧, {} 个检测, {} 个分类, {} 个跳过, {} 个未佩戴口罩",
    report.frames, report.detections, report.classified, report.skipped, report.negatives
  );
  if report.failed_frames > 0 || report.render_failures > 0 {
    info!(
      "检测失败 {} 帧, 渲染失败 {} 帧",
      report.failed_frames, report.render_failures
    );
  }
  info!("结束原因: {:?}", report.termination);

  Ok(())
}
