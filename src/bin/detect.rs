// 该文件是 Xifeng （西风） 项目的一部分。
// src/bin/detect.rs - 目标检测命令行程序
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

use anyhow::Result;
use clap::Parser;
use image::RgbImage;
use tracing::info;
use url::Url;

use xifeng::{
  FromUrl,
  engine::TractEngine,
  input::InputWrapper,
  model::{DetectResult, Labels, ModelSpec},
  output::{OutputWrapper, Render},
  task::{BatchTask, DEFAULT_CONFIDENCE, Task},
};

/// Xifeng 检测程序参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型描述，例如 ssd:///path/model.onnx?width=300&height=300
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源: image:// 或 folder://
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径: image:// 或 folder://
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 类别名称文件，每行一个
  #[arg(long, value_name = "LABELS")]
  pub labels: Option<PathBuf>,
  /// 置信度阈值
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
  pub confidence: f32,
  /// NMS 的 IoU 阈值，不指定时不做抑制
  #[arg(long)]
  pub nms_threshold: Option<f32>,
  /// 批大小
  #[arg(long, default_value_t = 1)]
  pub batch: usize,
  /// 处理的帧数上限
  #[arg(long)]
  pub frame_number: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let spec = ModelSpec::from_url(&args.model)?;
  let labels = match &args.labels {
    Some(path) => Labels::from_file(path)?,
    None => Labels::default(),
  };
  info!("类别名称 {} 个", labels.len());

  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?.with_labels(labels.clone());

  let batch_size = if Render::<RgbImage, DetectResult>::single_shot(&output) {
    1
  } else {
    args.batch
  };
  let engine = TractEngine::new(&spec.path, batch_size, spec.shape)?;

  let report = BatchTask::new(spec)
    .with_batch_size(batch_size)
    .with_frame_number(args.frame_number)
    .with_confidence(args.confidence)
    .with_nms_threshold(args.nms_threshold)
    .with_labels(labels)
    .run_task(input, engine, output)?;

  info!("{:?}", report);
  Ok(())
}
