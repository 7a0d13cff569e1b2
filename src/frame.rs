// 该文件是 Xifeng （西风） 项目的一部分。
// src/frame.rs - 批次缓冲区与 NCHW 预处理
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

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::model::{ChannelOrder, InputShape};

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("输入像素数量不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("批次槽位越界: 索引 {index}, 批大小 {batch_size}")]
  SlotOutOfRange { index: usize, batch_size: usize },
  #[error("无效的批次布局: {0}")]
  InvalidLayout(String),
}

/// 一次推理调用使用的输入/输出缓冲区，整个任务期间只分配一次。
///
/// 输入为 `batch × C × H × W` 的平面布局，输出为 `batch × output_len`。
pub struct BatchBuffer {
  shape: InputShape,
  batch_size: usize,
  output_len: usize,
  input: Box<[f32]>,
  output: Box<[f32]>,
}

impl BatchBuffer {
  pub fn new(shape: InputShape, batch_size: usize, output_len: usize) -> Result<Self, FrameError> {
    if batch_size == 0 || shape.is_empty() || output_len == 0 {
      return Err(FrameError::InvalidLayout(format!(
        "批大小 {}, 输入 {:?}, 单张输出长度 {}",
        batch_size, shape, output_len
      )));
    }

    let input_len = shape
      .len()
      .checked_mul(batch_size)
      .ok_or_else(|| FrameError::InvalidLayout("输入缓冲区长度溢出".to_string()))?;
    let total_output_len = output_len
      .checked_mul(batch_size)
      .ok_or_else(|| FrameError::InvalidLayout("输出缓冲区长度溢出".to_string()))?;

    debug!(
      "分配批次缓冲区: 输入 {} 个浮点数, 输出 {} 个浮点数",
      input_len, total_output_len
    );

    Ok(Self {
      shape,
      batch_size,
      output_len,
      input: vec![0.0; input_len].into_boxed_slice(),
      output: vec![0.0; total_output_len].into_boxed_slice(),
    })
  }

  pub fn input(&self) -> &[f32] {
    &self.input
  }

  pub fn output(&self) -> &[f32] {
    &self.output
  }

  fn check_index(&self, index: usize) -> Result<(), FrameError> {
    if index < self.batch_size {
      Ok(())
    } else {
      Err(FrameError::SlotOutOfRange {
        index,
        batch_size: self.batch_size,
      })
    }
  }

  pub fn input_slot_mut(&mut self, index: usize) -> Result<&mut [f32], FrameError> {
    self.check_index(index)?;
    let len = self.shape.len();
    Ok(&mut self.input[index * len..(index + 1) * len])
  }

  pub fn output_slot(&self, index: usize) -> Result<&[f32], FrameError> {
    self.check_index(index)?;
    Ok(&self.output[index * self.output_len..(index + 1) * self.output_len])
  }

  /// 推理调用期间的视图: 输入只读，输出可写
  pub fn io_mut(&mut self) -> (&[f32], &mut [f32]) {
    (&self.input[..], &mut self.output[..])
  }
}

/// 缩放到模型输入尺寸
pub fn resize_to_input(frame: &RgbImage, shape: &InputShape) -> RgbImage {
  if frame.dimensions() == (shape.width, shape.height) {
    return frame.clone();
  }
  image::imageops::resize(frame, shape.width, shape.height, FilterType::Triangle)
}

/// 将交错排列的像素写入平面布局的槽位
pub fn write_planar(image: &RgbImage, order: ChannelOrder, slot: &mut [f32]) -> Result<(), FrameError> {
  let data = image.as_raw();
  if data.len() != slot.len() {
    return Err(FrameError::SizeMismatch {
      expected: slot.len(),
      actual: data.len(),
    });
  }

  let channels = 3;
  let plane_len = slot.len() / channels;
  for (pixel_index, pixel) in data.chunks_exact(channels).enumerate() {
    for plane in 0..channels {
      slot[plane * plane_len + pixel_index] = pixel[order.source_channel(plane, channels)] as f32;
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn shape(width: u32, height: u32, channels: usize) -> InputShape {
    InputShape {
      width,
      height,
      channels,
    }
  }

  #[test]
  fn planar_layout_groups_channels() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([1, 2, 3]));
    image.put_pixel(1, 0, Rgb([4, 5, 6]));

    let mut slot = vec![0.0; 6];
    write_planar(&image, ChannelOrder::Rgb, &mut slot).unwrap();
    assert_eq!(slot, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);

    write_planar(&image, ChannelOrder::Bgr, &mut slot).unwrap();
    assert_eq!(slot, vec![3.0, 6.0, 2.0, 5.0, 1.0, 4.0]);
  }

  #[test]
  fn size_mismatch_is_reported() {
    let image = RgbImage::new(4, 4);
    let mut buffer = BatchBuffer::new(shape(4, 4, 4), 1, 7).unwrap();
    let slot = buffer.input_slot_mut(0).unwrap();
    assert!(matches!(
      write_planar(&image, ChannelOrder::Rgb, slot),
      Err(FrameError::SizeMismatch {
        expected: 64,
        actual: 48
      })
    ));
  }

  #[test]
  fn slots_are_disjoint_and_bounds_checked() {
    let mut buffer = BatchBuffer::new(shape(2, 2, 3), 3, 5).unwrap();
    assert_eq!(buffer.input().len(), 36);
    assert_eq!(buffer.output().len(), 15);

    buffer.input_slot_mut(1).unwrap().fill(1.0);
    assert!(buffer.input()[..12].iter().all(|&v| v == 0.0));
    assert!(buffer.input()[12..24].iter().all(|&v| v == 1.0));
    assert!(buffer.input()[24..].iter().all(|&v| v == 0.0));

    buffer.io_mut().1[10] = 9.0;
    assert_eq!(buffer.output_slot(2).unwrap()[0], 9.0);

    assert!(matches!(
      buffer.input_slot_mut(3),
      Err(FrameError::SlotOutOfRange {
        index: 3,
        batch_size: 3
      })
    ));
    assert!(buffer.output_slot(3).is_err());
  }

  #[test]
  fn empty_layout_is_rejected() {
    assert!(BatchBuffer::new(shape(2, 2, 3), 0, 5).is_err());
    assert!(BatchBuffer::new(shape(0, 2, 3), 1, 5).is_err());
    assert!(BatchBuffer::new(shape(2, 2, 3), 1, 0).is_err());
  }

  #[test]
  fn resize_matches_model_input() {
    let image = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
    let resized = resize_to_input(&image, &shape(30, 20, 3));
    assert_eq!(resized.dimensions(), (30, 20));
    assert_eq!(resized.get_pixel(7, 7), &Rgb([10, 20, 30]));
  }
}
