// 该文件是 Xifeng （西风） 项目的一部分。
// src/engine/tract.rs - 基于 tract 的 ONNX 推理引擎
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

use std::path::Path;

use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::{
  engine::{EngineStatus, InferenceEngine},
  model::InputShape,
};

const TRACT_LOAD_FAILED: i32 = 1;
const TRACT_RUN_FAILED: i32 = 2;
const TRACT_OUTPUT_MISMATCH: i32 = 3;

/// 在 CPU 上运行 ONNX 模型
pub struct TractEngine {
  plan: TypedRunnableModel<TypedModel>,
  dims: [usize; 4],
}

impl TractEngine {
  pub fn new<P: AsRef<Path>>(
    model_path: P,
    batch_size: usize,
    shape: InputShape,
  ) -> Result<Self, EngineStatus> {
    let model_path = model_path.as_ref();
    let dims = [
      batch_size,
      shape.channels,
      shape.height as usize,
      shape.width as usize,
    ];

    info!("加载 ONNX 模型: {}", model_path.display());
    let load = |e: TractError| {
      EngineStatus::new(
        TRACT_LOAD_FAILED,
        format!("无法加载模型 {}: {}", model_path.display(), e),
      )
    };

    let plan = tract_onnx::onnx()
      .model_for_path(model_path)
      .map_err(load)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(dims[0], dims[1], dims[2], dims[3])),
      )
      .map_err(load)?
      .into_optimized()
      .map_err(load)?
      .into_runnable()
      .map_err(load)?;

    info!("模型加载完成, 输入形状 {:?}", dims);
    Ok(Self { plan, dims })
  }
}

impl InferenceEngine for TractEngine {
  fn infer(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineStatus> {
    let run = |e: TractError| EngineStatus::new(TRACT_RUN_FAILED, e.to_string());

    let tensor = Tensor::from_shape(&self.dims, input).map_err(run)?;
    let outputs = self.plan.run(tvec!(tensor.into())).map_err(run)?;
    let first = outputs
      .first()
      .ok_or_else(|| EngineStatus::new(TRACT_OUTPUT_MISMATCH, "模型没有输出"))?;
    let values = first.as_slice::<f32>().map_err(run)?;

    if values.len() != output.len() {
      return Err(EngineStatus::new(
        TRACT_OUTPUT_MISMATCH,
        format!(
          "输出长度不匹配: 期望 {}, 实际 {} (形状 {:?})",
          output.len(),
          values.len(),
          first.shape()
        ),
      ));
    }

    output.copy_from_slice(values);
    debug!("推理输出 {} 个浮点数", values.len());
    Ok(())
  }
}
