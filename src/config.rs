// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 级联推理配置
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

pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.1;
pub const DEFAULT_TOP_K: usize = 3;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("配置无效: {0}")]
  InvalidConfiguration(String),
}

/// 级联推理配置，启动时确定，进程生命周期内不可变
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeConfig {
  /// 检测置信度阈值 (0.0 - 1.0)
  pub score_threshold: f64,
  /// 每帧最多读取的检测行数
  pub top_k: usize,
  /// 是否额外以模型输出的有效行数 `count` 限制读取行数
  pub respect_count: bool,
}

impl Default for CascadeConfig {
  fn default() -> Self {
    Self {
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      top_k: DEFAULT_TOP_K,
      respect_count: false,
    }
  }
}

impl CascadeConfig {
  pub fn with_score_threshold(mut self, score_threshold: f64) -> Self {
    self.score_threshold = score_threshold;
    self
  }

  pub fn with_top_k(mut self, top_k: usize) -> Self {
    self.top_k = top_k;
    self
  }

  pub fn with_respect_count(mut self, respect_count: bool) -> Self {
    self.respect_count = respect_count;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !self.score_threshold.is_finite() || !(0.0..=1.0).contains(&self.score_threshold) {
      return Err(ConfigError::InvalidConfiguration(format!(
        "置信度阈值必须位于 [0, 1] 区间, 实际为 {}",
        self.score_threshold
      )));
    }
    if self.top_k == 0 {
      return Err(ConfigError::InvalidConfiguration(
        "top_k 必须大于 0".to_string(),
      ));
    }
    Ok(())
  }
}
