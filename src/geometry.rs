// 该文件是 Xifeng （西风） 项目的一部分。
// src/geometry.rs - 边界框几何运算
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

//! 轴对齐边界框的重叠、交集、并集与 IoU 计算。
//!
//! 坐标均为模型输入空间下的绝对像素坐标 `[x_min, y_min, x_max, y_max]`。
//! 宽或高为零甚至为负的退化框是合法的，在重叠计算中视为空框。

/// 轴对齐边界框
pub trait BoundingBox {
  fn corners(&self) -> [f32; 4];

  fn width(&self) -> f32 {
    let [x_min, _, x_max, _] = self.corners();
    x_max - x_min
  }

  fn height(&self) -> f32 {
    let [_, y_min, _, y_max] = self.corners();
    y_max - y_min
  }

  fn center(&self) -> (f32, f32) {
    let [x_min, y_min, x_max, y_max] = self.corners();
    ((x_min + x_max) / 2.0, (y_min + y_max) / 2.0)
  }
}

impl BoundingBox for [f32; 4] {
  fn corners(&self) -> [f32; 4] {
    *self
  }
}

impl<B: BoundingBox + ?Sized> BoundingBox for &B {
  fn corners(&self) -> [f32; 4] {
    (**self).corners()
  }
}

/// 一维区间重叠长度，区间以中心和跨度描述。结果为负表示不重叠。
pub fn overlap_1d(center1: f32, extent1: f32, center2: f32, extent2: f32) -> f32 {
  let left = (center1 - extent1 / 2.0).max(center2 - extent2 / 2.0);
  let right = (center1 + extent1 / 2.0).min(center2 + extent2 / 2.0);
  right - left
}

/// 面积，退化框为 0
pub fn area<B: BoundingBox>(b: &B) -> f32 {
  b.width().max(0.0) * b.height().max(0.0)
}

/// 交集面积，任一轴不重叠时为 0
pub fn intersection_area<A: BoundingBox, B: BoundingBox>(a: &A, b: &B) -> f32 {
  let (acx, acy) = a.center();
  let (bcx, bcy) = b.center();
  let w = overlap_1d(acx, a.width(), bcx, b.width());
  let h = overlap_1d(acy, a.height(), bcy, b.height());

  if w < 0.0 || h < 0.0 {
    return 0.0;
  }

  w * h
}

pub fn union_area<A: BoundingBox, B: BoundingBox>(a: &A, b: &B) -> f32 {
  area(a) + area(b) - intersection_area(a, b)
}

/// 交并比。
///
/// 两个框都为空时并集为 0，此时约定返回 0 而不是 NaN。
pub fn iou<A: BoundingBox, B: BoundingBox>(a: &A, b: &B) -> f32 {
  let union = union_area(a, b);
  if union > 0.0 {
    intersection_area(a, b) / union
  } else {
    0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const EPS: f32 = 1e-6;

  #[test]
  fn overlap_1d_is_negative_for_separated_intervals() {
    assert_eq!(overlap_1d(0.0, 2.0, 5.0, 2.0), -3.0);
    assert_eq!(overlap_1d(0.0, 2.0, 1.0, 2.0), 1.0);
    // 包含关系
    assert_eq!(overlap_1d(0.0, 10.0, 1.0, 2.0), 2.0);
  }

  #[test]
  fn iou_of_box_with_itself_is_one() {
    for b in [[0.0, 0.0, 10.0, 10.0], [3.5, 1.0, 4.0, 9.0], [-5.0, -5.0, 5.0, 1.0]] {
      assert!((iou(&b, &b) - 1.0).abs() < EPS, "{b:?}");
    }
  }

  #[test]
  fn disjoint_boxes_have_no_intersection() {
    let a = [0.0, 0.0, 1.0, 1.0];
    let b = [1.5, 0.0, 21.5, 20.0];
    assert_eq!(intersection_area(&a, &b), 0.0);
    assert_eq!(iou(&a, &b), 0.0);

    // 只在一个轴上重叠
    let c = [0.0, 5.0, 1.0, 6.0];
    assert_eq!(intersection_area(&a, &c), 0.0);
    assert_eq!(iou(&a, &c), 0.0);
  }

  #[test]
  fn touching_edges_do_not_overlap() {
    let a = [0.0, 0.0, 2.0, 2.0];
    let b = [2.0, 0.0, 4.0, 2.0];
    assert_eq!(intersection_area(&a, &b), 0.0);
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn partial_overlap_matches_hand_computation() {
    let a = [0.0, 0.0, 2.0, 2.0];
    let b = [1.0, 1.0, 3.0, 3.0];
    assert!((intersection_area(&a, &b) - 1.0).abs() < EPS);
    assert!((union_area(&a, &b) - 7.0).abs() < EPS);
    assert!((iou(&a, &b) - 1.0 / 7.0).abs() < EPS);
  }

  #[test]
  fn iou_is_symmetric() {
    let boxes = [
      [0.0, 0.0, 2.0, 2.0],
      [1.0, 1.0, 3.0, 3.0],
      [0.5, -1.0, 1.5, 4.0],
      [10.0, 10.0, 30.0, 15.0],
    ];
    for a in &boxes {
      for b in &boxes {
        assert!((iou(a, b) - iou(b, a)).abs() < EPS);
      }
    }
  }

  #[test]
  fn degenerate_boxes_are_empty() {
    let point = [1.0, 1.0, 1.0, 1.0];
    assert_eq!(area(&point), 0.0);
    assert_eq!(iou(&point, &point), 0.0);

    // 宽高均为负的框面积不能变成正数
    let inverted = [4.0, 4.0, 2.0, 1.0];
    assert_eq!(area(&inverted), 0.0);
    let normal = [0.0, 0.0, 5.0, 5.0];
    assert_eq!(intersection_area(&inverted, &normal), 0.0);
    assert_eq!(iou(&inverted, &normal), 0.0);
  }
}
