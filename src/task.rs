// 该文件是 Xifeng （西风） 项目的一部分。
// src/task.rs - 批量推理任务
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

use std::time::Instant;

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  engine::InferenceEngine,
  frame::{BatchBuffer, resize_to_input, write_planar},
  model::{Decode, DetectResult, Labels, ModelSpec, Nms},
  output::Render,
};

pub const DEFAULT_CONFIDENCE: f32 = 0.4;

pub trait Task<I, E, O>: Sized {
  type Error;
  type Report;
  fn run_task(self, input: I, engine: E, output: O) -> Result<Self::Report, Self::Error>;
}

/// 任务结束时的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskReport {
  /// 推理调用次数
  pub batches: usize,
  /// 从输入源取出的帧数
  pub frames_read: usize,
  /// 交给输出的帧数
  pub frames_emitted: usize,
  /// 取出后未经推理即丢弃的帧数: 输入耗尽时未凑满的一批，或超出帧数上限的一批
  pub dropped_frames: usize,
  pub detections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
  FillingBatch,
  Inferring,
  Postprocessing,
  Done,
}

/// 按批推理的流水线。
///
/// 每批凑满 `batch_size` 帧后调用一次推理引擎，再逐帧解码、抑制、输出。
/// 输入耗尽时不足一批的帧被丢弃。
#[derive(Debug, Clone)]
pub struct BatchTask {
  spec: ModelSpec,
  batch_size: usize,
  frame_number: Option<usize>,
  confidence: f32,
  nms: Option<Nms>,
  labels: Labels,
}

impl BatchTask {
  pub fn new(spec: ModelSpec) -> Self {
    Self {
      spec,
      batch_size: 1,
      frame_number: None,
      confidence: DEFAULT_CONFIDENCE,
      nms: None,
      labels: Labels::default(),
    }
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  /// 帧数上限。凑满一批后取出的帧数超过上限时，该批不再推理，任务结束。
  /// `Some(0)` 与 `None` 相同，不设上限。
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number.filter(|&n| n > 0);
    self
  }

  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn with_nms_threshold(mut self, iou_threshold: Option<f32>) -> Self {
    self.nms = iou_threshold.map(Nms::new);
    self
  }

  pub fn with_nms(mut self, nms: Option<Nms>) -> Self {
    self.nms = nms;
    self
  }

  pub fn with_labels(mut self, labels: Labels) -> Self {
    self.labels = labels;
    self
  }

  fn frame_limit_exceeded(&self, frames_read: usize) -> bool {
    self.frame_number.is_some_and(|n| frames_read > n)
  }

  fn postprocess(&self, output: &[f32], index: usize) -> Result<DetectResult, anyhow::Error> {
    let result = self.spec.decoder.decode(output, index, self.confidence)?;
    let decoded = result.len();
    let result = match &self.nms {
      Some(nms) => result.suppress_by_class(nms),
      None => result,
    }
    .visible();
    debug!("第 {} 帧: 解码 {} 个目标, 保留 {} 个", index, decoded, result.len());
    Ok(result)
  }
}

impl<I, E, O, RE> Task<I, E, O> for BatchTask
where
  I: Iterator<Item = RgbImage>,
  E: InferenceEngine,
  O: Render<RgbImage, DetectResult, Error = RE>,
  RE: std::error::Error + Sync + Send + 'static,
{
  type Error = anyhow::Error;
  type Report = TaskReport;

  fn run_task(self, mut input: I, mut engine: E, output: O) -> Result<TaskReport, Self::Error> {
    let single_shot = output.single_shot();
    let batch_size = if single_shot && self.batch_size != 1 {
      warn!("单张图像输出, 批大小由 {} 改为 1", self.batch_size);
      1
    } else {
      self.batch_size
    };

    let shape = self.spec.shape;
    let mut buffer = BatchBuffer::new(shape, batch_size, self.spec.decoder.output_len())?;
    let mut frames: Vec<RgbImage> = Vec::with_capacity(batch_size);
    let mut report = TaskReport::default();
    let mut stage = Stage::FillingBatch;

    info!(
      "开始任务: 输入 {}x{}x{}, 批大小 {}, 置信度阈值 {}",
      shape.width, shape.height, shape.channels, batch_size, self.confidence
    );

    while stage != Stage::Done {
      stage = match stage {
        Stage::FillingBatch => {
          frames.clear();
          while frames.len() < batch_size {
            let Some(frame) = input.next() else {
              break;
            };
            report.frames_read += 1;
            let resized = resize_to_input(&frame, &shape);
            write_planar(&resized, self.spec.order, buffer.input_slot_mut(frames.len())?)?;
            frames.push(resized);
          }

          if frames.len() == batch_size && self.frame_limit_exceeded(report.frames_read) {
            info!("已取出 {} 帧, 超过指定帧数, 退出任务循环", report.frames_read);
            report.dropped_frames += frames.len();
            Stage::Done
          } else if frames.len() == batch_size {
            Stage::Inferring
          } else {
            if !frames.is_empty() {
              warn!("输入耗尽, 丢弃未凑满一批的 {} 帧", frames.len());
              report.dropped_frames += frames.len();
            }
            info!("输入耗尽, 结束任务");
            Stage::Done
          }
        }
        Stage::Inferring => {
          let now = Instant::now();
          let (batch_input, batch_output) = buffer.io_mut();
          if let Err(status) = engine.infer(batch_input, batch_output) {
            error!("第 {} 批推理失败: {}", report.batches + 1, status);
            return Err(status.into());
          }
          report.batches += 1;
          info!("第 {} 批推理完成, 耗时: {:.2?}", report.batches, now.elapsed());
          Stage::Postprocessing
        }
        Stage::Postprocessing => {
          let now = Instant::now();
          let mut finished = false;
          for (index, frame) in frames.iter().enumerate() {
            let result = self.postprocess(buffer.output(), index)?;
            for item in result.iter() {
              info!(
                "检测到 {} ({}): 置信度 {:.3}, 位置 {:?}",
                self.labels.name(item.class_id),
                item.class_id,
                item.display_score(),
                item.bbox
              );
            }
            report.detections += result.len();
            output.render_result(frame, &result)?;
            report.frames_emitted += 1;

            if single_shot {
              info!("单张图像输出完成");
              finished = true;
              break;
            }
          }
          info!("第 {} 批后处理完成, 耗时: {:.2?}", report.batches, now.elapsed());

          if finished {
            Stage::Done
          } else {
            Stage::FillingBatch
          }
        }
        Stage::Done => Stage::Done,
      };
    }

    info!(
      "任务完成: {} 批, 输出 {} 帧, {} 个目标",
      report.batches, report.frames_emitted, report.detections
    );
    Ok(report)
  }
}
