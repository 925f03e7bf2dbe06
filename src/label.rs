// 该文件是 Shanan （山南西风） 项目的一部分。
// src/label.rs - 标签文件加载
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

use std::{borrow::Cow, collections::HashMap, path::Path};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("正则表达式错误: {0}")]
  RegexError(#[from] regex::Error),
  #[error("标签文件格式错误, 第 {line} 行: {content:?}")]
  MalformedLabelFile { line: usize, content: String },
}

/// 类别编号到类别名称的映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels {
  names: HashMap<u32, String>,
}

impl Labels {
  /// 解析标签文本，每一行形如 `<编号><名称>`，任意一行不匹配则整体失败
  pub fn parse(text: &str) -> Result<Self, LabelError> {
    let pattern = label_pattern()?;
    let mut names = HashMap::new();

    for (index, line) in text.lines().enumerate() {
      let malformed = || LabelError::MalformedLabelFile {
        line: index + 1,
        content: line.to_string(),
      };
      let captures = pattern.captures(line).ok_or_else(malformed)?;
      let id = captures[1].parse::<u32>().map_err(|_| malformed())?;
      names.insert(id, captures[2].trim().to_string());
    }

    debug!("解析到 {} 个标签", names.len());
    Ok(Labels { names })
  }

  pub fn get(&self, id: u32) -> Option<&str> {
    self.names.get(&id).map(String::as_str)
  }

  /// 找不到名称时退回到编号本身
  pub fn name_or_id(&self, id: u32) -> Cow<'_, str> {
    match self.get(id) {
      Some(name) => Cow::Borrowed(name),
      None => Cow::Owned(id.to_string()),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

fn label_pattern() -> Result<Regex, regex::Error> {
  Regex::new(r"^\s*(\d+)(.+)")
}

pub fn load_labels<P: AsRef<Path>>(path: P) -> Result<Labels, LabelError> {
  let path = path.as_ref();
  info!("加载标签文件: {}", path.display());
  let text = std::fs::read_to_string(path)?;
  Labels::parse(&text)
}
