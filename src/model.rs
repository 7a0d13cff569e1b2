// 该文件是 Xifeng （西风） 项目的一部分。
// src/model.rs - 检测结果与模型描述
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

use std::{
  borrow::Cow,
  io::BufRead,
  path::{Path, PathBuf},
  str::FromStr,
  sync::Arc,
};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, geometry::BoundingBox, url_path};

mod nms;
mod ssd;
mod yolo;

pub use self::nms::Nms;
pub use self::ssd::{SSD_RECORD_LEN, SsdDecoder};
pub use self::yolo::{YOLO_SCALE_FACTOR, YoloDecoder};

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: usize,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，模型输入空间的绝对坐标
}

impl BoundingBox for DetectItem {
  fn corners(&self) -> [f32; 4] {
    self.bbox
  }
}

impl DetectItem {
  /// 用于显示的置信度
  pub fn display_score(&self) -> f32 {
    self.score.clamp(0.0, 1.0)
  }
}

/// 单张图像的检测集合，顺序即解码顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl FromIterator<DetectItem> for DetectResult {
  fn from_iter<T: IntoIterator<Item = DetectItem>>(iter: T) -> Self {
    iter.into_iter().collect::<Vec<_>>().into()
  }
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }

  /// 不区分类别的非极大值抑制，返回保留下来的检测
  pub fn suppress(&self, nms: &Nms) -> DetectResult {
    let keep = nms.keep_mask(&self.items[..]);
    self.select(&keep)
  }

  /// 每个类别单独做一次非极大值抑制，保持原有顺序
  pub fn suppress_by_class(&self, nms: &Nms) -> DetectResult {
    let mut keep = vec![true; self.items.len()];

    let mut classes: Vec<usize> = self.items.iter().map(|item| item.class_id).collect();
    classes.sort_unstable();
    classes.dedup();

    for class_id in classes {
      let indices: Vec<usize> = (0..self.items.len())
        .filter(|&i| self.items[i].class_id == class_id)
        .collect();
      let subset: Vec<&DetectItem> = indices.iter().map(|&i| &self.items[i]).collect();
      for (&index, kept) in indices.iter().zip(nms.keep_mask(&subset[..])) {
        keep[index] = kept;
      }
    }

    self.select(&keep)
  }

  /// 去掉置信度不为正的检测
  pub fn visible(self) -> DetectResult {
    self
      .items
      .into_vec()
      .into_iter()
      .filter(|item| item.score > 0.0)
      .collect()
  }

  fn select(&self, keep: &[bool]) -> DetectResult {
    self
      .items
      .iter()
      .zip(keep)
      .filter_map(|(item, &kept)| kept.then(|| item.clone()))
      .collect()
  }
}

/// 类别名称表
#[derive(Debug, Clone, Default)]
pub struct Labels {
  names: Arc<[String]>,
}

impl Labels {
  pub fn new(names: Vec<String>) -> Self {
    Self {
      names: names.into(),
    }
  }

  /// 每行一个类别名称
  pub fn from_reader<R: BufRead>(reader: R) -> std::io::Result<Self> {
    let names = reader
      .lines()
      .map(|line| line.map(|l| l.trim_end().to_string()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self::new(names))
  }

  pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
    let file = std::fs::File::open(path)?;
    Self::from_reader(std::io::BufReader::new(file))
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 名称表中没有的类别以数字显示
  pub fn name(&self, class_id: usize) -> Cow<'_, str> {
    match self.names.get(class_id) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(class_id.to_string()),
    }
  }
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("输出长度不匹配: 期望 {expected}, 实际 {actual}")]
  OutputLength { expected: usize, actual: usize },
  #[error("图像索引越界: 索引 {index}, 输出中共 {images} 张图像")]
  ImageIndexOutOfRange { index: usize, images: usize },
  #[error("类别越界: 类别 {class_num}, 模型共 {classes} 类")]
  ClassOutOfRange { class_num: usize, classes: usize },
}

/// 输出张量解码接口
pub trait Decode {
  /// 单张图像在输出缓冲区中占用的浮点数个数
  fn output_len(&self) -> usize;

  fn decode_slot(&self, slot: &[f32], threshold: f32) -> Result<DetectResult, DecodeError>;

  /// 从整批输出中解码第 `image_index` 张图像
  fn decode(
    &self,
    output: &[f32],
    image_index: usize,
    threshold: f32,
  ) -> Result<DetectResult, DecodeError> {
    let len = self.output_len();
    if len == 0 {
      return Err(DecodeError::OutputLength {
        expected: 0,
        actual: output.len(),
      });
    }

    let slot = output
      .chunks_exact(len)
      .nth(image_index)
      .ok_or(DecodeError::ImageIndexOutOfRange {
        index: image_index,
        images: output.len() / len,
      })?;
    self.decode_slot(slot, threshold)
  }
}

/// 由模型描述选择的解码方式
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderKind {
  Ssd(SsdDecoder),
  Yolo(YoloDecoder),
}

impl Decode for DecoderKind {
  fn output_len(&self) -> usize {
    match self {
      DecoderKind::Ssd(decoder) => decoder.output_len(),
      DecoderKind::Yolo(decoder) => decoder.output_len(),
    }
  }

  fn decode_slot(&self, slot: &[f32], threshold: f32) -> Result<DetectResult, DecodeError> {
    match self {
      DecoderKind::Ssd(decoder) => decoder.decode_slot(slot, threshold),
      DecoderKind::Yolo(decoder) => decoder.decode_slot(slot, threshold),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl ChannelOrder {
  /// 平面布局中第 `plane` 个通道对应的交错像素通道
  pub fn source_channel(self, plane: usize, channels: usize) -> usize {
    match self {
      ChannelOrder::Rgb => plane,
      ChannelOrder::Bgr => channels - 1 - plane,
    }
  }
}

impl FromStr for ChannelOrder {
  type Err = ModelSpecError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      _ => Err(ModelSpecError::InvalidParameter("order".into(), s.into())),
    }
  }
}

/// 模型输入尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  pub channels: usize,
}

impl InputShape {
  pub fn plane_len(&self) -> usize {
    self.width as usize * self.height as usize
  }

  /// 单张图像的输入长度 C × H × W
  pub fn len(&self) -> usize {
    self.plane_len() * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Error, Debug)]
pub enum ModelSpecError {
  #[error("模型方案不支持: {0}")]
  SchemeMismatch(String),
  #[error("模型参数 {0} 无效: {1}")]
  InvalidParameter(String, String),
}

const SSD_SCHEME: &str = "ssd";
const YOLO_SCHEME: &str = "yolo";

const SSD_DEFAULT_INPUT: u32 = 300;
const SSD_DEFAULT_NUM_LABELS: usize = 20;
const SSD_DEFAULT_PROPOSALS: usize = 200;

const YOLO_DEFAULT_INPUT: u32 = 448;
const YOLO_DEFAULT_GRID: usize = 7;
const YOLO_DEFAULT_BOXES: usize = 2;
const YOLO_DEFAULT_CLASSES: usize = 20;

/// 模型元数据: 模型文件、输入尺寸与输出编码方式
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
  pub path: PathBuf,
  pub shape: InputShape,
  pub order: ChannelOrder,
  pub decoder: DecoderKind,
}

fn query_param<T: FromStr>(url: &Url, key: &str) -> Result<Option<T>, ModelSpecError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v
      .parse()
      .map(Some)
      .map_err(|_| ModelSpecError::InvalidParameter(key.to_string(), v.to_string())),
    None => Ok(None),
  }
}

fn positive<T: PartialOrd + Default + ToString>(key: &str, value: T) -> Result<T, ModelSpecError> {
  if value > T::default() {
    Ok(value)
  } else {
    Err(ModelSpecError::InvalidParameter(
      key.to_string(),
      value.to_string(),
    ))
  }
}

impl FromUrl for ModelSpec {
  type Error = ModelSpecError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let default_input = match url.scheme() {
      SSD_SCHEME => SSD_DEFAULT_INPUT,
      YOLO_SCHEME => YOLO_DEFAULT_INPUT,
      other => return Err(ModelSpecError::SchemeMismatch(other.to_string())),
    };

    let shape = InputShape {
      width: positive("width", query_param(url, "width")?.unwrap_or(default_input))?,
      height: positive("height", query_param(url, "height")?.unwrap_or(default_input))?,
      channels: positive("channels", query_param(url, "channels")?.unwrap_or(3))?,
    };
    if shape.plane_len().checked_mul(shape.channels).is_none() {
      return Err(ModelSpecError::InvalidParameter(
        "channels".to_string(),
        shape.channels.to_string(),
      ));
    }
    let order = query_param(url, "order")?.unwrap_or_default();

    let decoder = if url.scheme() == SSD_SCHEME {
      let num_labels = positive(
        "labels",
        query_param(url, "labels")?.unwrap_or(SSD_DEFAULT_NUM_LABELS),
      )?;
      let proposals = positive(
        "proposals",
        query_param(url, "proposals")?.unwrap_or(SSD_DEFAULT_PROPOSALS),
      )?;
      if proposals.checked_mul(SSD_RECORD_LEN).is_none() {
        return Err(ModelSpecError::InvalidParameter(
          "proposals".to_string(),
          proposals.to_string(),
        ));
      }
      DecoderKind::Ssd(SsdDecoder::new(
        shape.width,
        shape.height,
        num_labels,
        proposals,
      ))
    } else {
      let grid = positive("grid", query_param(url, "grid")?.unwrap_or(YOLO_DEFAULT_GRID))?;
      let boxes = positive("boxes", query_param(url, "boxes")?.unwrap_or(YOLO_DEFAULT_BOXES))?;
      let classes = positive(
        "classes",
        query_param(url, "classes")?.unwrap_or(YOLO_DEFAULT_CLASSES),
      )?;
      let scale = positive("scale", query_param(url, "scale")?.unwrap_or(YOLO_SCALE_FACTOR))?;
      // 单张输出长度 S·S·(C + B·5) 必须可表示
      let output_len = grid.checked_mul(grid).and_then(|cells| {
        boxes
          .checked_mul(5)
          .and_then(|b| b.checked_add(classes))
          .and_then(|per_cell| cells.checked_mul(per_cell))
      });
      if output_len.is_none() {
        return Err(ModelSpecError::InvalidParameter(
          "grid".to_string(),
          format!("grid={grid}, boxes={boxes}, classes={classes}"),
        ));
      }
      DecoderKind::Yolo(
        YoloDecoder::new(shape.width, shape.height, grid, boxes, classes).with_scale_factor(scale),
      )
    };

    debug!("模型描述: {:?} {:?} {:?}", shape, order, decoder);

    Ok(ModelSpec {
      path: url_path(url),
      shape,
      order,
      decoder,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class_id: usize, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn suppress_by_class_keeps_overlapping_boxes_of_different_classes() {
    let result = DetectResult::from(vec![
      item(1, 0.9, [0.0, 0.0, 10.0, 10.0]),
      item(2, 0.8, [0.0, 0.0, 10.0, 10.0]),
      item(1, 0.7, [1.0, 0.0, 11.0, 10.0]),
    ]);
    let nms = Nms::new(0.5);

    let agnostic = result.suppress(&nms);
    assert_eq!(agnostic.len(), 1);
    assert_eq!(agnostic.items[0].score, 0.9);

    let per_class = result.suppress_by_class(&nms);
    assert_eq!(per_class.len(), 2);
    assert_eq!(per_class.items[0], result.items[0]);
    assert_eq!(per_class.items[1], result.items[1]);
  }

  #[test]
  fn visible_drops_non_positive_scores() {
    let result = DetectResult::from(vec![
      item(0, 0.0, [0.0, 0.0, 1.0, 1.0]),
      item(0, 0.5, [0.0, 0.0, 1.0, 1.0]),
      item(0, -0.1, [0.0, 0.0, 1.0, 1.0]),
    ]);
    let visible = result.visible();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible.items[0].score, 0.5);
  }

  #[test]
  fn labels_fall_back_to_numeric_id() {
    let labels = Labels::from_reader("aeroplane\nbicycle\r\nbird\n".as_bytes()).unwrap();
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.name(1), "bicycle");
    assert_eq!(labels.name(7), "7");
  }

  #[test]
  fn decode_rejects_missing_image_index() {
    let decoder = DecoderKind::Ssd(SsdDecoder::new(300, 300, 20, 1));
    let output = vec![0.0; SSD_RECORD_LEN * 2];
    assert!(decoder.decode(&output, 1, 0.4).is_ok());
    assert!(matches!(
      decoder.decode(&output, 2, 0.4),
      Err(DecodeError::ImageIndexOutOfRange { index: 2, images: 2 })
    ));
  }

  #[test]
  fn model_spec_from_ssd_url() {
    let url = Url::parse("ssd:///models/mobilenet-ssd.onnx?width=320&height=240&labels=21&order=bgr")
      .unwrap();
    let spec = ModelSpec::from_url(&url).unwrap();
    assert_eq!(spec.path, PathBuf::from("/models/mobilenet-ssd.onnx"));
    assert_eq!(
      spec.shape,
      InputShape {
        width: 320,
        height: 240,
        channels: 3
      }
    );
    assert_eq!(spec.order, ChannelOrder::Bgr);
    assert_eq!(
      spec.decoder,
      DecoderKind::Ssd(SsdDecoder::new(320, 240, 21, SSD_DEFAULT_PROPOSALS))
    );
    assert_eq!(spec.decoder.output_len(), SSD_DEFAULT_PROPOSALS * SSD_RECORD_LEN);
  }

  #[test]
  fn model_spec_from_yolo_url_uses_defaults() {
    let url = Url::parse("yolo:///models/tiny-yolo-v1.onnx").unwrap();
    let spec = ModelSpec::from_url(&url).unwrap();
    assert_eq!(spec.shape.width, 448);
    assert_eq!(spec.order, ChannelOrder::Rgb);
    assert_eq!(spec.decoder.output_len(), 7 * 7 * (20 + 2 * 5));
  }

  #[test]
  fn model_spec_rejects_bad_parameters() {
    for raw in [
      "ssd:///m.onnx?width=0",
      "ssd:///m.onnx?proposals=abc",
      "yolo:///m.onnx?order=yuv",
      "onnx:///m.onnx",
    ] {
      let url = Url::parse(raw).unwrap();
      assert!(ModelSpec::from_url(&url).is_err(), "{raw}");
    }
  }

  #[test]
  fn model_spec_rejects_overflowing_layouts() {
    for raw in [
      "yolo:///m.onnx?grid=10000000000",
      "yolo:///m.onnx?classes=18446744073709551615",
      "ssd:///m.onnx?proposals=18446744073709551615",
      "ssd:///m.onnx?channels=4611686018427387904",
    ] {
      let url = Url::parse(raw).unwrap();
      assert!(
        matches!(
          ModelSpec::from_url(&url),
          Err(ModelSpecError::InvalidParameter(..))
        ),
        "{raw}"
      );
    }
  }
}
