// 该文件是 Xifeng （西风） 项目的一部分。
// src/input/image_sequence.rs - 图像序列目录输入
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

use std::{collections::VecDeque, path::PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, url_path};

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageSequenceInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法读取目录 {0}: {1}")]
  IoError(PathBuf, std::io::Error),
  #[error("目录中没有图像文件: {0}")]
  Empty(PathBuf),
}

/// 按文件名顺序逐帧读取目录中的图像。
///
/// 某一帧解码失败时视为输入结束。
pub struct ImageSequenceInput {
  frames: VecDeque<PathBuf>,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageSequenceInput {
  type Error = ImageSequenceInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageSequenceInputError::SchemeMismatch);
    }

    let directory = url_path(url);
    let entries = std::fs::read_dir(&directory)
      .map_err(|e| ImageSequenceInputError::IoError(directory.clone(), e))?;

    let mut frames = Vec::new();
    for entry in entries {
      let path = entry
        .map_err(|e| ImageSequenceInputError::IoError(directory.clone(), e))?
        .path();
      let is_image = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
      if is_image && path.is_file() {
        frames.push(path);
      }
    }

    if frames.is_empty() {
      return Err(ImageSequenceInputError::Empty(directory));
    }
    frames.sort();

    info!("图像序列 {}: 共 {} 帧", directory.display(), frames.len());
    Ok(ImageSequenceInput {
      frames: frames.into(),
    })
  }
}

impl ImageSequenceInput {
  pub fn remaining(&self) -> usize {
    self.frames.len()
  }
}

impl Iterator for ImageSequenceInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    let path = self.frames.pop_front()?;
    debug!("读取帧 {}", path.display());

    let decoded = ImageReader::open(&path)
      .map_err(image::ImageError::IoError)
      .and_then(|reader| reader.decode());
    match decoded {
      Ok(image) => Some(image.into_rgb8()),
      Err(e) => {
        error!("读取帧 {} 失败: {}, 输入结束", path.display(), e);
        self.frames.clear();
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn folder_url(path: &std::path::Path) -> Url {
    Url::parse(&format!("folder://{}", path.display())).unwrap()
  }

  #[test]
  fn reads_frames_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    for (name, value) in [("002.png", 2u8), ("000.png", 0), ("001.jpg", 1)] {
      RgbImage::from_pixel(4, 4, Rgb([value * 100; 3]))
        .save(dir.path().join(name))
        .unwrap();
    }
    std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

    let input = ImageSequenceInput::from_url(&folder_url(dir.path())).unwrap();
    assert_eq!(input.remaining(), 3);

    let firsts: Vec<u8> = input.map(|frame| frame.get_pixel(0, 0)[0]).collect();
    assert_eq!(firsts.len(), 3);
    assert_eq!(firsts[0], 0);
    assert_eq!(firsts[2], 200);
  }

  #[test]
  fn corrupt_frame_ends_the_stream() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
    std::fs::write(dir.path().join("b.png"), b"garbage").unwrap();
    RgbImage::new(2, 2).save(dir.path().join("c.png")).unwrap();

    let input = ImageSequenceInput::from_url(&folder_url(dir.path())).unwrap();
    assert_eq!(input.count(), 1);
  }

  #[test]
  fn empty_or_missing_directory_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      ImageSequenceInput::from_url(&folder_url(dir.path())),
      Err(ImageSequenceInputError::Empty(_))
    ));
    assert!(matches!(
      ImageSequenceInput::from_url(&folder_url(&dir.path().join("missing"))),
      Err(ImageSequenceInputError::IoError(..))
    ));
  }
}
