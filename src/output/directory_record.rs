// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use chrono::{Datelike, Utc};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{DetectResult, WithLabel},
  output::{
    Render,
    draw::{Draw, DrawDetectionOnFrame},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 将一次检测的三件产物写入按日期分层的目录：
/// 原始帧 `<前缀>.png`、标注图 `<前缀>-annotated.png`、
/// 检测记录 `<前缀>.json`。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    // always: 空结果也落盘
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::default(),
      frame_counters: Arc::new(Mutex::new(0)),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    let mut counter = self.frame_counters.lock().unwrap_or_else(|e| e.into_inner());
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn frame_prefix(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl<T: WithLabel> Render<RgbFrame, DetectResult<T>> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("空检测结果, 跳过目录记录");
      return Ok(());
    }

    let prefix = self.frame_prefix()?;
    let (annotated, records) = self.draw.draw_detection(frame, result);

    let annotated_path = {
      let mut name = prefix.as_os_str().to_os_string();
      name.push("-annotated.png");
      PathBuf::from(name)
    };

    frame.as_image().save(prefix.with_extension("png"))?;
    annotated.save(annotated_path)?;
    std::fs::write(
      prefix.with_extension("json"),
      serde_json::to_vec_pretty(&records)?,
    )?;

    debug!("目录记录完成: {}", prefix.display());
    Ok(())
  }
}
