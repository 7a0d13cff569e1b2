// 该文件是 Xifeng （西风） 项目的一部分。
// src/model/yolo.rs - YOLO 网格回归解码
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

use tracing::debug;

use crate::model::{Decode, DecodeError, DetectItem, DetectResult};

/// 参考模型的类别概率校准系数，换模型时需要重新标定
pub const YOLO_SCALE_FACTOR: f32 = 3.0;

/// 网格回归解码器 (S × S 网格，每格 B 个框，C 个类别)。
///
/// 单张图像的输出布局:
/// - `[0, S·S·C)`: 每格每类的条件概率
/// - `[S·S·C, S·S·C + S·S·B)`: 每个框的置信度
/// - 其余 `S·S·B·4`: 每个框的 `(tx, ty, tw, th)`
#[derive(Debug, Clone, PartialEq)]
pub struct YoloDecoder {
  input_width: f32,
  input_height: f32,
  grid: usize,
  boxes: usize,
  classes: usize,
  scale_factor: f32,
}

impl YoloDecoder {
  pub fn new(input_width: u32, input_height: u32, grid: usize, boxes: usize, classes: usize) -> Self {
    Self {
      input_width: input_width as f32,
      input_height: input_height as f32,
      grid,
      boxes,
      classes,
      scale_factor: YOLO_SCALE_FACTOR,
    }
  }

  pub fn with_scale_factor(mut self, scale_factor: f32) -> Self {
    self.scale_factor = scale_factor;
    self
  }

  fn cells(&self) -> usize {
    self.grid * self.grid
  }

  /// 解码单个类别，不做抑制
  pub fn decode_class(
    &self,
    slot: &[f32],
    class_num: usize,
    threshold: f32,
  ) -> Result<DetectResult, DecodeError> {
    if slot.len() != self.output_len() {
      return Err(DecodeError::OutputLength {
        expected: self.output_len(),
        actual: slot.len(),
      });
    }
    if class_num >= self.classes {
      return Err(DecodeError::ClassOutOfRange {
        class_num,
        classes: self.classes,
      });
    }

    let prob_size = self.cells() * self.classes;
    let conf_size = self.cells() * self.boxes;
    let (probs, rest) = slot.split_at(prob_size);
    let (confs, coords) = rest.split_at(conf_size);

    let s = self.grid as f32;
    let mut items = Vec::new();

    for cell in 0..self.cells() {
      let row = (cell / self.grid) as f32;
      let col = (cell % self.grid) as f32;

      for b in 0..self.boxes {
        let slot_index = cell * self.boxes + b;
        let score = probs[cell * self.classes + class_num] * confs[slot_index] * self.scale_factor;
        if score < threshold {
          continue;
        }

        let &[tx, ty, tw, th] = &coords[slot_index * 4..slot_index * 4 + 4] else {
          continue;
        };
        let xc = (tx + col) / s;
        let yc = (ty + row) / s;
        let w = tw * tw;
        let h = th * th;

        items.push(DetectItem {
          class_id: class_num,
          score,
          bbox: [
            (xc - w / 2.0) * self.input_width,
            (yc - h / 2.0) * self.input_height,
            (xc + w / 2.0) * self.input_width,
            (yc + h / 2.0) * self.input_height,
          ],
        });
      }
    }

    debug!("类别 {} 解码得到 {} 个检测", class_num, items.len());
    Ok(items.into())
  }
}

impl Decode for YoloDecoder {
  fn output_len(&self) -> usize {
    self.cells() * (self.classes + self.boxes * 5)
  }

  /// 按类别依次解码并拼接，抑制需要由调用方按类别完成
  fn decode_slot(&self, slot: &[f32], threshold: f32) -> Result<DetectResult, DecodeError> {
    let mut items = Vec::new();
    for class_num in 0..self.classes {
      items.extend(self.decode_class(slot, class_num, threshold)?.items);
    }
    Ok(items.into())
  }
}
