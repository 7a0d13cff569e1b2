// 该文件是 Xifeng （西风） 项目的一部分。
// src/engine.rs - 推理引擎接口
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

use thiserror::Error;

#[cfg(feature = "backend_tract")]
mod tract;
#[cfg(feature = "backend_tract")]
pub use self::tract::TractEngine;

/// 推理引擎返回的非零状态码及诊断信息
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("推理引擎返回状态码 {code}: {message}")]
pub struct EngineStatus {
  pub code: i32,
  pub message: String,
}

impl EngineStatus {
  pub fn new(code: i32, message: impl Into<String>) -> Self {
    Self {
      code,
      message: message.into(),
    }
  }

  /// 状态码 0 表示成功
  pub fn check(code: i32, message: impl Into<String>) -> Result<(), EngineStatus> {
    if code == 0 {
      Ok(())
    } else {
      Err(Self::new(code, message))
    }
  }
}

/// 推理引擎。
///
/// `input` 为 `batch × C × H × W` 的平面布局输入，只在本次调用期间借给引擎；
/// `output` 为预先分配好的整批输出缓冲区，由引擎填充。
pub trait InferenceEngine {
  fn infer(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineStatus>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for &mut E {
  fn infer(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineStatus> {
    (**self).infer(input, output)
  }
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
  fn infer(&mut self, input: &[f32], output: &mut [f32]) -> Result<(), EngineStatus> {
    (**self).infer(input, output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_status_is_success() {
    assert!(EngineStatus::check(0, "").is_ok());

    let status = EngineStatus::check(-3, "设备忙").unwrap_err();
    assert_eq!(status.code, -3);
    assert_eq!(status.to_string(), "推理引擎返回状态码 -3: 设备忙");
  }
}
