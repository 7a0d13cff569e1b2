// 该文件是 Xifeng （西风） 项目的一部分。
// src/model/nms.rs - 贪心非极大值抑制
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

use std::borrow::Borrow;

use tracing::debug;

use crate::{geometry::iou, model::DetectItem};

/// 贪心非极大值抑制。
///
/// 按解码顺序两两比较 `(i, j)`，`i < j`。IoU 超过阈值时置信度较低的一方被抑制，
/// 置信度相同时抑制靠后的 `j`。被抑制的检测在后续比较中按置信度 0 参与，
/// 因此它不会再压掉任何置信度为正的检测。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nms {
  iou_threshold: f32,
  skipped_class: Option<usize>,
}

impl Nms {
  pub fn new(iou_threshold: f32) -> Self {
    Self {
      iou_threshold,
      skipped_class: None,
    }
  }

  /// 该类别的检测不作为比较的主动方 (例如背景类)
  pub fn with_skipped_class(mut self, skipped_class: Option<usize>) -> Self {
    self.skipped_class = skipped_class;
    self
  }

  /// 返回与输入等长的保留标记
  pub fn keep_mask<I: Borrow<DetectItem>>(&self, items: &[I]) -> Vec<bool> {
    let mut keep = vec![true; items.len()];
    let mut scores: Vec<f32> = items.iter().map(|item| item.borrow().score).collect();

    for i in 0..items.len() {
      let a = items[i].borrow();
      if self.skipped_class == Some(a.class_id) {
        continue;
      }

      for j in (i + 1)..items.len() {
        let b = items[j].borrow();
        if iou(a, b) > self.iou_threshold {
          let loser = if scores[i] < scores[j] { i } else { j };
          keep[loser] = false;
          scores[loser] = 0.0;
        }
      }
    }

    debug!(
      "NMS: {} 个检测中保留 {} 个",
      items.len(),
      keep.iter().filter(|&&k| k).count()
    );

    keep
  }
}
