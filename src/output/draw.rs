// 该文件是 Xifeng （西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::model::{DetectItem, DetectResult, Labels};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const BOX_COLOR: [u8; 3] = [255, 55, 0];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {0}: {1}")]
  FontIo(PathBuf, std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(PathBuf),
}

/// 在帧上绘制检测框，配置了字体时在框上方标注类别与置信度
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  color: Rgb<u8>,
  labels: Labels,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      color: Rgb(BOX_COLOR),
      labels: Labels::default(),
    }
  }
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| DrawError::FontIo(path.to_path_buf(), e))?;
    let font =
      FontVec::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))?;
    info!("加载标注字体: {}", path.display());
    self.font = Some(font);
    Ok(self)
  }

  /// 读取 URL 中的 `font=` 参数
  pub fn from_query(url: &Url) -> Result<Self, DrawError> {
    let font = url
      .query_pairs()
      .find(|(k, _)| k == "font")
      .map(|(_, v)| PathBuf::from(v.into_owned()));
    match font {
      Some(path) => Draw::default().with_font_file(path),
      None => Ok(Draw::default()),
    }
  }

  pub fn set_labels(&mut self, labels: Labels) {
    self.labels = labels;
  }

  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    for item in result.iter() {
      self.draw_item(image, item);
    }
  }

  fn draw_item(&self, image: &mut RgbImage, item: &DetectItem) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [x_min, y_min, x_max, y_max] = item.bbox;
    let x_min = (x_min.floor() as i32).clamp(0, w - 1);
    let y_min = (y_min.floor() as i32).clamp(0, h - 1);
    let x_max = (x_max.ceil() as i32).clamp(0, w - 1);
    let y_max = (y_max.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框向内加粗
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!(
      "{} {:.2}",
      self.labels.name(item.class_id),
      item.display_score()
    );
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, &label);
    let label_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;
    let label_x = x_min;
    let label_y = (y_min - label_height).max(0);
    let label_width = (text_width as i32).min(w - label_x);

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
      draw_filled_rect_mut(image, rect, self.color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

/// 以 JSON 记录检测结果
#[cfg(feature = "directory_record")]
pub struct Record {
  pub label_with_name: bool,
}

#[cfg(feature = "directory_record")]
impl Record {
  pub fn record(
    &self,
    result: &DetectResult,
    labels: &Labels,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    let detections: Vec<serde_json::Value> = result
      .iter()
      .map(|item| {
        let label = if self.label_with_name {
          serde_json::Value::from(labels.name(item.class_id).into_owned())
        } else {
          serde_json::Value::from(item.class_id)
        };
        serde_json::json!({
          "label": label,
          "score": item.score,
          "bbox": item.bbox,
        })
      })
      .collect();

    let file = std::fs::File::create(path.with_extension("json"))?;
    serde_json::to_writer_pretty(
      std::io::BufWriter::new(file),
      &serde_json::json!({ "detections": detections }),
    )?;
    Ok(())
  }
}
