// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use shanan_mask::config::{CascadeConfig, DEFAULT_SCORE_THRESHOLD, DEFAULT_TOP_K};

/// 人脸检测 + 口罩分类级联推理
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测模型，文件路径（可带 `@设备` 后缀）或模型 URL
  #[arg(long, default_value = "mobilenet_ssd_v2_coco_quant_postprocess.rknn", value_name = "MODEL")]
  pub model: String,

  /// 口罩分类模型，格式同 `--model`
  #[arg(long, default_value = "mask_detector_quant.rknn", value_name = "MODEL")]
  pub model2: String,

  /// 标签文件，每行 `<序号> <名称>`
  #[arg(long, default_value = "coco_labels.txt", value_name = "FILE")]
  pub labels: PathBuf,

  /// 摄像头序号，对应 /dev/video{N}
  #[arg(long, default_value_t = 0, value_name = "INDEX")]
  pub camera_idx: u32,

  /// 输入来源，指定后忽略 `--camera-idx`
  /// 支持格式:
  /// - 摄像头: gst://camera/dev/video0?width=640&height=480
  /// - 视频: gst://file/path/to/video.mp4
  /// - 图片: image:///path/to/image.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<Url>,

  /// 输出目标
  /// 支持格式:
  /// - 窗口: display://?font=/path/font.ttf
  /// - 图片: image:///path/to/out.png
  /// - 目录: folder:///path/to/dir?record=name&always
  #[arg(long, default_value = "display://", value_name = "OUTPUT")]
  pub output: Url,

  /// 检测分数阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f64,

  /// 每帧最多保留的检测数量
  #[arg(long, default_value_t = DEFAULT_TOP_K, value_name = "K")]
  pub top_k: usize,

  /// 同时以模型输出的有效检测数量限制遍历范围
  #[arg(long)]
  pub respect_count: bool,

  /// 最大处理帧数，省略表示无限制
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<usize>,
}

impl Args {
  pub fn cascade_config(&self) -> CascadeConfig {
    CascadeConfig::default()
      .with_score_threshold(self.threshold)
      .with_top_k(self.top_k)
      .with_respect_count(self.respect_count)
  }
}
