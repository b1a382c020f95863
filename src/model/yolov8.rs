// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/model/yolov8.rs - 模型定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Mutex;

use image::RgbImage;
use ndarray::{Array2, Array4, ArrayViewD, Axis};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::TensorRef,
};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl,
  frame::RgbFrame,
  model::{DetectItem, DetectResult, Model, PRODUCT_CLASS_NUM, ProductLabel, WithLabel},
};

const YOLOV8_INPUT_W: u32 = 640;
const YOLOV8_INPUT_H: u32 = 640;
const YOLOV8_FEATURES: usize = 4 + PRODUCT_CLASS_NUM;
const YOLOV8_NMS_IOU: f32 = 0.45;
const YOLOV8_PAD_FILL: f32 = 114.0 / 255.0;
const YOLOV8_DEFAULT_THREADS: usize = 4;

/// 置信度阈值下限，与交互端滑块范围一致
pub const CONFIDENCE_MIN: f32 = 0.05;
/// 置信度阈值上限
pub const CONFIDENCE_MAX: f32 = 1.0;

pub struct Yolov8 {
  // ort 的 run 需要独占会话；权重加载后只读，infer 内部串行化
  session: Mutex<Session>,
}

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理输出形状错误: {0}")]
  OutputShape(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
}

impl From<std::io::Error> for Yolov8Error {
  fn from(err: std::io::Error) -> Self {
    Yolov8Error::ModelLoadError(err)
  }
}

impl From<ort::Error> for Yolov8Error {
  fn from(err: ort::Error) -> Self {
    Yolov8Error::OrtError(err)
  }
}

impl Yolov8Error {
  pub fn invalid(msg: &str) -> Self {
    Yolov8Error::ModelInvalid(msg.to_string())
  }
}

pub struct Yolov8Builder {
  model_path: String,
  intra_threads: usize,
}

const YOLOV8_SCHEME: &str = "onnx";

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLOV8_SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLOV8_SCHEME
      )));
    }

    let mut intra_threads = YOLOV8_DEFAULT_THREADS;
    for (k, v) in url.query_pairs() {
      if k == "threads"
        && let Ok(n) = v.parse()
      {
        intra_threads = n;
      }
    }

    Ok(Yolov8Builder {
      model_path: url.path().to_string(),
      intra_threads,
    })
  }
}

impl Yolov8Builder {
  pub fn intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads;
    self
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.intra_threads)?
      .commit_from_memory(&model_data)?;
    info!("模型加载完成");

    let num_inputs = session.inputs.len();
    let num_outputs = session.outputs.len();

    if num_inputs != 1 {
      error!("预期模型输入数量为 1, 实际为 {}", num_inputs);
      return Err(Yolov8Error::invalid(&format!(
        "预期模型输入数量为 1, 实际为 {}",
        num_inputs
      )));
    }

    if num_outputs != 1 {
      error!("预期模型输出数量为 1, 实际为 {}", num_outputs);
      return Err(Yolov8Error::invalid(&format!(
        "预期模型输出数量为 1, 实际为 {}",
        num_outputs
      )));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);

    Ok(Yolov8 {
      session: Mutex::new(session),
    })
  }
}

/// 写字框（letterbox）参数：等比缩放加灰边，反变换时使用
#[derive(Debug, Clone, Copy)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
}

fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
  let (width, height) = image.dimensions();
  let scale = (YOLOV8_INPUT_W as f32 / width as f32).min(YOLOV8_INPUT_H as f32 / height as f32);

  let new_w = ((width as f32 * scale).round() as u32).clamp(1, YOLOV8_INPUT_W);
  let new_h = ((height as f32 * scale).round() as u32).clamp(1, YOLOV8_INPUT_H);

  let resized =
    image::imageops::resize(image, new_w, new_h, image::imageops::FilterType::Triangle);

  let pad_x = (YOLOV8_INPUT_W - new_w) as f32 / 2.0;
  let pad_y = (YOLOV8_INPUT_H - new_h) as f32 / 2.0;
  let offset_x = pad_x.floor() as usize;
  let offset_y = pad_y.floor() as usize;

  let mut canvas = Array4::from_elem(
    (1, 3, YOLOV8_INPUT_H as usize, YOLOV8_INPUT_W as usize),
    YOLOV8_PAD_FILL,
  );

  for (x, y, pixel) in resized.enumerate_pixels() {
    let x = offset_x + x as usize;
    let y = offset_y + y as usize;
    canvas[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
    canvas[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
    canvas[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
  }

  (canvas, Letterbox { scale, pad_x, pad_y })
}

/// 解码检测头输出。接受 `[1, 22, N]` 或 `[1, N, 22]` 两种排布，
/// 逐锚点取最优类别，按阈值过滤后反变换回帧像素坐标并做 NMS。
/// 导出的权重在图内已做过 sigmoid，类别分数直接是 [0,1] 概率。
fn decode_output(
  output: ArrayViewD<'_, f32>,
  letterbox: Letterbox,
  frame_w: u32,
  frame_h: u32,
  confidence: f32,
) -> Result<Vec<DetectItem<ProductLabel>>, Yolov8Error> {
  let shape = output.shape().to_vec();
  if shape.len() != 3 || shape[0] != 1 {
    return Err(Yolov8Error::OutputShape(format!(
      "期望输出形状 [1, {}, N] 或 [1, N, {}], 实际 {:?}",
      YOLOV8_FEATURES, YOLOV8_FEATURES, shape
    )));
  }

  let view = output.index_axis(Axis(0), 0);
  let grid = if view.shape()[0] == YOLOV8_FEATURES {
    // [22, N] -> [N, 22]
    view.t().to_owned()
  } else if view.shape()[1] == YOLOV8_FEATURES {
    view.to_owned()
  } else {
    return Err(Yolov8Error::OutputShape(format!(
      "期望特征维度 {}, 实际输出形状 {:?}",
      YOLOV8_FEATURES, shape
    )));
  };
  let grid: Array2<f32> = grid
    .into_dimensionality()
    .map_err(|e| Yolov8Error::OutputShape(e.to_string()))?;

  let mut candidates = Vec::new();

  for i in 0..grid.nrows() {
    let row = grid.row(i);

    let (class_id, score) = {
      let mut best = f32::MIN;
      let mut class_idx = 0usize;
      for c in 0..PRODUCT_CLASS_NUM {
        let s = row[4 + c];
        if s > best {
          best = s;
          class_idx = c;
        }
      }
      (class_idx as u32, best)
    };

    if !score.is_finite() || score < confidence {
      continue;
    }

    let cx = row[0];
    let cy = row[1];
    let bw = row[2];
    let bh = row[3];
    if !(cx.is_finite() && cy.is_finite() && bw.is_finite() && bh.is_finite())
      || bw <= 0.0
      || bh <= 0.0
    {
      continue;
    }

    // 反 letterbox 变换回帧像素坐标
    let x_min = ((cx - bw / 2.0) - letterbox.pad_x) / letterbox.scale;
    let y_min = ((cy - bh / 2.0) - letterbox.pad_y) / letterbox.scale;
    let x_max = ((cx + bw / 2.0) - letterbox.pad_x) / letterbox.scale;
    let y_max = ((cy + bh / 2.0) - letterbox.pad_y) / letterbox.scale;

    let x_min = x_min.clamp(0.0, frame_w as f32);
    let y_min = y_min.clamp(0.0, frame_h as f32);
    let x_max = x_max.clamp(0.0, frame_w as f32);
    let y_max = y_max.clamp(0.0, frame_h as f32);

    // 钳制后退化的框直接丢弃，保证 x_min < x_max, y_min < y_max
    if x_max - x_min < 1.0 || y_max - y_min < 1.0 {
      continue;
    }

    let Some(kind) = ProductLabel::from_label_id(class_id) else {
      continue;
    };

    candidates.push(DetectItem {
      kind,
      score,
      bbox: [x_min, y_min, x_max, y_max],
    });
  }

  Ok(nms(candidates, YOLOV8_NMS_IOU))
}

/// 同类贪心非极大值抑制，结果按置信度降序
fn nms(mut items: Vec<DetectItem<ProductLabel>>, iou_threshold: f32) -> Vec<DetectItem<ProductLabel>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result = Vec::with_capacity(items.len());

  while !items.is_empty() {
    let best = items.remove(0);
    items.retain(|item| item.kind != best.kind || iou(&best.bbox, &item.bbox) < iou_threshold);
    result.push(best);
  }

  result
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

impl Model for Yolov8 {
  type Input = RgbFrame;
  type Output = DetectResult<ProductLabel>;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input, confidence: f32) -> Result<Self::Output, Self::Error> {
    let confidence = confidence.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);

    debug!("预处理输入帧 {}x{}", input.width(), input.height());
    let (tensor, letterbox) = preprocess(input.as_image());
    let tensor = tensor.into_dyn();

    debug!("执行模型推理");
    let output = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| Yolov8Error::InferenceError("推理会话锁中毒".to_string()))?;
      let tensor_ref = TensorRef::from_array_view(&tensor)?;
      let outputs = session.run(ort::inputs![tensor_ref])?;
      outputs[0].try_extract_array::<f32>()?.into_owned()
    };

    debug!("后处理模型输出");
    let items = decode_output(
      output.view(),
      letterbox,
      input.width(),
      input.height(),
      confidence,
    )?;

    debug!("检测到 {} 个物品", items.len());
    debug!("检测结果: {:?}", items);

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::Array3;

  // 构造 [1, 22, N] 排布的检测头输出
  fn synthetic_output(anchors: &[(f32, f32, f32, f32, usize, f32)]) -> Array3<f32> {
    let n = anchors.len();
    let mut output = Array3::zeros((1, YOLOV8_FEATURES, n));
    for (i, &(cx, cy, w, h, class_id, score)) in anchors.iter().enumerate() {
      output[[0, 0, i]] = cx;
      output[[0, 1, i]] = cy;
      output[[0, 2, i]] = w;
      output[[0, 3, i]] = h;
      output[[0, 4 + class_id, i]] = score;
    }
    output
  }

  fn no_letterbox() -> Letterbox {
    Letterbox {
      scale: 1.0,
      pad_x: 0.0,
      pad_y: 0.0,
    }
  }

  #[test]
  fn decode_filters_by_confidence() {
    let output = synthetic_output(&[
      (100.0, 100.0, 50.0, 50.0, 13, 0.9),
      (300.0, 300.0, 40.0, 40.0, 0, 0.1),
    ]);
    let items = decode_output(output.view().into_dyn(), no_letterbox(), 640, 640, 0.25).unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, ProductLabel::Soda);
    assert!((items[0].score - 0.9).abs() < 1e-6);
  }

  #[test]
  fn decode_box_is_ordered_and_in_bounds() {
    let output = synthetic_output(&[(100.0, 100.0, 300.0, 300.0, 5, 0.8)]);
    let items = decode_output(output.view().into_dyn(), no_letterbox(), 640, 640, 0.25).unwrap();

    let [x1, y1, x2, y2] = items[0].bbox;
    assert!(x1 < x2 && y1 < y2);
    assert!(x1 >= 0.0 && y1 >= 0.0 && x2 <= 640.0 && y2 <= 640.0);
  }

  #[test]
  fn decode_undoes_letterbox() {
    // 2000x1000 的帧按 0.32 缩放后上下各留 160 灰边
    let letterbox = Letterbox {
      scale: 0.32,
      pad_x: 0.0,
      pad_y: 160.0,
    };
    let output = synthetic_output(&[(64.0, 224.0, 64.0, 64.0, 13, 0.87)]);
    let items = decode_output(output.view().into_dyn(), letterbox, 2000, 1000, 0.25).unwrap();

    let [x1, y1, x2, y2] = items[0].bbox;
    assert!((x1 - 100.0).abs() < 1e-3);
    assert!((y1 - 100.0).abs() < 1e-3);
    assert!((x2 - 300.0).abs() < 1e-3);
    assert!((y2 - 300.0).abs() < 1e-3);
  }

  #[test]
  fn higher_threshold_yields_subset() {
    let output = synthetic_output(&[
      (100.0, 100.0, 50.0, 50.0, 1, 0.9),
      (300.0, 300.0, 40.0, 40.0, 2, 0.5),
      (500.0, 500.0, 40.0, 40.0, 3, 0.3),
    ]);

    let loose = decode_output(output.view().into_dyn(), no_letterbox(), 640, 640, 0.25).unwrap();
    let strict = decode_output(output.view().into_dyn(), no_letterbox(), 640, 640, 0.45).unwrap();

    assert_eq!(loose.len(), 3);
    assert_eq!(strict.len(), 2);
    for item in &strict {
      assert!(
        loose
          .iter()
          .any(|other| other.kind == item.kind && other.bbox == item.bbox)
      );
    }
  }

  #[test]
  fn decode_rejects_wrong_shape() {
    let output = Array3::<f32>::zeros((1, 7, 10));
    assert!(matches!(
      decode_output(output.view().into_dyn(), no_letterbox(), 640, 640, 0.25),
      Err(Yolov8Error::OutputShape(_))
    ));
  }

  #[test]
  fn decode_accepts_transposed_layout() {
    // [1, N, 22] 排布
    let mut output = Array3::zeros((1, 2, YOLOV8_FEATURES));
    output[[0, 0, 0]] = 100.0;
    output[[0, 0, 1]] = 100.0;
    output[[0, 0, 2]] = 50.0;
    output[[0, 0, 3]] = 50.0;
    output[[0, 0, 4]] = 0.9;

    let items = decode_output(output.view().into_dyn(), no_letterbox(), 640, 640, 0.25).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].kind, ProductLabel::Cake);
  }

  #[test]
  fn nms_suppresses_same_class_overlap() {
    let items = vec![
      DetectItem {
        kind: ProductLabel::Milk,
        score: 0.9,
        bbox: [10.0, 10.0, 110.0, 110.0],
      },
      DetectItem {
        kind: ProductLabel::Milk,
        score: 0.8,
        bbox: [12.0, 12.0, 112.0, 112.0],
      },
    ];
    let kept = nms(items, YOLOV8_NMS_IOU);
    assert_eq!(kept.len(), 1);
    assert!((kept[0].score - 0.9).abs() < 1e-6);
  }

  #[test]
  fn nms_keeps_overlapping_different_classes() {
    let items = vec![
      DetectItem {
        kind: ProductLabel::Milk,
        score: 0.9,
        bbox: [10.0, 10.0, 110.0, 110.0],
      },
      DetectItem {
        kind: ProductLabel::Water,
        score: 0.8,
        bbox: [12.0, 12.0, 112.0, 112.0],
      },
    ];
    let kept = nms(items, YOLOV8_NMS_IOU);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn nms_sorts_by_confidence() {
    let items = vec![
      DetectItem {
        kind: ProductLabel::Tea,
        score: 0.3,
        bbox: [0.0, 0.0, 10.0, 10.0],
      },
      DetectItem {
        kind: ProductLabel::Rice,
        score: 0.7,
        bbox: [100.0, 100.0, 120.0, 120.0],
      },
    ];
    let kept = nms(items, YOLOV8_NMS_IOU);
    assert!((kept[0].score - 0.7).abs() < 1e-6);
  }

  #[test]
  fn iou_of_disjoint_boxes_is_zero() {
    assert_eq!(
      iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]),
      0.0
    );
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let b = [5.0, 5.0, 25.0, 25.0];
    assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn preprocess_letterboxes_wide_frame() {
    let image = RgbImage::from_pixel(2000, 1000, image::Rgb([50, 60, 70]));
    let (tensor, letterbox) = preprocess(&image);

    assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
    assert!((letterbox.scale - 0.32).abs() < 1e-6);
    assert!((letterbox.pad_x - 0.0).abs() < 1e-6);
    assert!((letterbox.pad_y - 160.0).abs() < 1e-6);

    // 灰边在缩放内容上下
    assert!((tensor[[0, 0, 0, 0]] - YOLOV8_PAD_FILL).abs() < 1e-6);
    // 内容区归一化到 [0,1]
    assert!((tensor[[0, 0, 320, 320]] - 50.0 / 255.0).abs() < 1e-2);
  }
}
