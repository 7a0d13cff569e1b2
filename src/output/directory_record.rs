// 该文件是 Xifeng （西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{Datelike, Local};
use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectResult, Labels},
  output::{
    Render,
    draw::{Draw, DrawError, Record},
  },
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("绘制配置错误: {0}")]
  DrawError(#[from] DrawError),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

/// 按日期目录连续保存帧。
///
/// 默认保存绘制后的帧；`record=name|id` 时保存原始帧并附带 JSON 记录。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  labels: Labels,
  frame_counter: AtomicU32,
  detected_only: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let draw = match uri.query_pairs().find(|(k, _)| k == "record") {
      Some((_, v)) => DrawWrapper::Record(Record {
        label_with_name: v != "id",
      }),
      None => DrawWrapper::Draw(Box::new(Draw::from_query(uri)?)),
    };
    let detected_only = uri.query_pairs().any(|(k, _)| k == "detected");

    Ok(DirectoryRecordOutput {
      directory: url_path(uri),
      draw,
      labels: Labels::default(),
      frame_counter: AtomicU32::new(0),
      detected_only,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn set_labels(&mut self, labels: Labels) {
    if let DrawWrapper::Draw(draw) = &mut self.draw {
      draw.set_labels(labels.clone());
    }
    self.labels = labels;
  }

  /// 已保存的帧数
  pub fn saved_frames(&self) -> u32 {
    self.frame_counter.load(Ordering::Relaxed)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let id = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
    Ok(directory.join(format!("{}-{:06}.png", now.format("%H-%M-%S"), id)))
  }
}

impl Render<RgbImage, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &RgbImage, result: &DetectResult) -> Result<(), Self::Error> {
    if self.detected_only && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path()?;
    match &self.draw {
      DrawWrapper::Draw(draw) => {
        let mut image = frame.clone();
        draw.draw_detections(&mut image, result);
        image.save(&path)?;
      }
      DrawWrapper::Record(record) => {
        frame.save(&path)?;
        record.record(result, &self.labels, &path)?;
      }
    }
    debug!("保存帧 {}: {} 个目标", path.display(), result.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn files_with_extension(root: &std::path::Path, ext: &str) -> usize {
    let mut count = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else if path.extension().is_some_and(|e| e == ext) {
          count += 1;
        }
      }
    }
    count
  }

  fn one_detection() -> DetectResult {
    DetectResult::from(vec![DetectItem {
      class_id: 0,
      score: 0.7,
      bbox: [0.0, 0.0, 4.0, 4.0],
    }])
  }

  #[test]
  fn appends_frames_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?record=id", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert!(!Render::<RgbImage, DetectResult>::single_shot(&output));

    let frame = RgbImage::new(8, 8);
    output.render_result(&frame, &one_detection()).unwrap();
    output.render_result(&frame, &DetectResult::default()).unwrap();

    assert_eq!(output.saved_frames(), 2);
    assert_eq!(files_with_extension(dir.path(), "png"), 2);
    assert_eq!(files_with_extension(dir.path(), "json"), 2);
  }

  #[test]
  fn detected_flag_skips_empty_frames() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?detected", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();

    let frame = RgbImage::new(8, 8);
    output.render_result(&frame, &DetectResult::default()).unwrap();
    output.render_result(&frame, &one_detection()).unwrap();

    assert_eq!(output.saved_frames(), 1);
    assert_eq!(files_with_extension(dir.path(), "png"), 1);
    assert_eq!(files_with_extension(dir.path(), "json"), 0);
  }
}
