// 该文件是 Xifeng （西风） 项目的一部分。
// src/model/ssd.rs - SSD 候选框列表解码
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

/// 每条候选记录: [image_id, label, confidence, x_min, y_min, x_max, y_max]
pub const SSD_RECORD_LEN: usize = 7;

/// 固定步长候选框列表解码器。
///
/// 坐标为归一化值，乘以模型输入宽高得到绝对坐标。标签从 1 开始，
/// 解码时减 1 并截断到 `[0, num_labels - 1]`。无效的填充记录依靠置信度阈值过滤。
#[derive(Debug, Clone, PartialEq)]
pub struct SsdDecoder {
  input_width: f32,
  input_height: f32,
  num_labels: usize,
  max_proposals: usize,
}

impl SsdDecoder {
  pub fn new(input_width: u32, input_height: u32, num_labels: usize, max_proposals: usize) -> Self {
    Self {
      input_width: input_width as f32,
      input_height: input_height as f32,
      num_labels,
      max_proposals,
    }
  }

  /// 越界标签截断而不是丢弃
  pub fn clamp_label(&self, raw_label: f32) -> usize {
    let label = (raw_label - 1.0) as i64;
    label.clamp(0, self.num_labels.saturating_sub(1) as i64) as usize
  }
}

impl Decode for SsdDecoder {
  fn output_len(&self) -> usize {
    self.max_proposals * SSD_RECORD_LEN
  }

  fn decode_slot(&self, slot: &[f32], threshold: f32) -> Result<DetectResult, DecodeError> {
    if slot.len() != self.output_len() {
      return Err(DecodeError::OutputLength {
        expected: self.output_len(),
        actual: slot.len(),
      });
    }

    let result: DetectResult = slot
      .chunks_exact(SSD_RECORD_LEN)
      .enumerate()
      .filter_map(|(index, record)| {
        let &[_image_id, label, confidence, x_min, y_min, x_max, y_max] = record else {
          return None;
        };
        if !(confidence > threshold) {
          return None;
        }

        let item = DetectItem {
          class_id: self.clamp_label(label),
          score: confidence,
          bbox: [
            x_min * self.input_width,
            y_min * self.input_height,
            x_max * self.input_width,
            y_max * self.input_height,
          ],
        };
        debug!("候选 {}: {:?}", index, item);
        Some(item)
      })
      .collect();

    debug!("SSD 解码得到 {} 个检测", result.len());
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
  }

  #[test]
  fn decodes_single_record_into_absolute_box() {
    let decoder = SsdDecoder::new(300, 300, 20, 2);
    let mut slot = vec![0.0; decoder.output_len()];
    slot[..SSD_RECORD_LEN].copy_from_slice(&[0.0, 3.0, 0.9, 0.1, 0.2, 0.5, 0.6]);

    let result = decoder.decode_slot(&slot, 0.4).unwrap();
    assert_eq!(result.len(), 1);

    let item = &result.items[0];
    assert_eq!(item.class_id, 2);
    assert!(close(item.score, 0.9));
    let expected = [30.0, 60.0, 150.0, 180.0];
    for (got, want) in item.bbox.iter().zip(expected) {
      assert!(close(*got, want), "{:?}", item.bbox);
    }
  }

  #[test]
  fn records_at_or_below_threshold_are_dropped() {
    let decoder = SsdDecoder::new(300, 300, 20, 2);
    let slot = [
      [0.0, 3.0, 0.3, 0.1, 0.2, 0.5, 0.6],
      [0.0, 4.0, 0.4, 0.1, 0.2, 0.5, 0.6],
    ]
    .concat();
    assert!(decoder.decode_slot(&slot, 0.4).unwrap().is_empty());
  }

  #[test]
  fn coordinates_scale_with_non_square_input() {
    let decoder = SsdDecoder::new(640, 480, 20, 1);
    let slot = [0.0, 1.0, 0.8, 0.25, 0.5, 0.75, 1.0];
    let item = &decoder.decode_slot(&slot, 0.4).unwrap().items[0];
    assert_eq!(item.class_id, 0);
    assert_eq!(item.bbox, [160.0, 240.0, 480.0, 480.0]);
  }

  #[test]
  fn out_of_range_labels_are_clamped() {
    let decoder = SsdDecoder::new(300, 300, 20, 1);
    assert_eq!(decoder.clamp_label(0.0), 0);
    assert_eq!(decoder.clamp_label(-4.0), 0);
    assert_eq!(decoder.clamp_label(20.0), 19);
    assert_eq!(decoder.clamp_label(21.0), 19);
    assert_eq!(decoder.clamp_label(250.0), 19);
    assert_eq!(decoder.clamp_label(f32::NAN), 0);
  }

  #[test]
  fn preserves_proposal_order() {
    let decoder = SsdDecoder::new(100, 100, 20, 3);
    let slot = [
      [0.0, 2.0, 0.5, 0.0, 0.0, 0.1, 0.1],
      [0.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
      [0.0, 7.0, 0.95, 0.2, 0.2, 0.3, 0.3],
    ]
    .concat();
    let result = decoder.decode_slot(&slot, 0.4).unwrap();
    let classes: Vec<usize> = result.iter().map(|item| item.class_id).collect();
    assert_eq!(classes, vec![1, 6]);
  }

  #[test]
  fn rejects_wrong_slot_length() {
    let decoder = SsdDecoder::new(300, 300, 20, 2);
    assert!(matches!(
      decoder.decode_slot(&[0.0; 10], 0.4),
      Err(DecodeError::OutputLength {
        expected: 14,
        actual: 10
      })
    ));
  }
}
