// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  frame::RgbFrame,
  model::{DetectItem, DetectResult, WithLabel},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_TAG_PADDING: i32 = 4; // 标签背景相对文本的外扩
const LABEL_TEXT_INSET: i32 = 2; // 文本相对标签背景的内缩
const BOX_STROKE_WIDTH: i32 = 3;
const BOX_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色
const TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色文本

// 依次尝试的 TrueType 字体路径，全部失败则静默退回内置点阵字体
const TRUETYPE_FONT_PATHS: &[&str] = &[
  "arial.ttf",
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

const BUILTIN_GLYPH_SCALE: i32 = 2;
const BUILTIN_GLYPH_SIZE: i32 = 8 * BUILTIN_GLYPH_SCALE;

/// 标签字体：优先 TrueType，不可用时退回 8x8 点阵
pub enum LabelFont {
  TrueType(FontVec),
  Builtin,
}

impl LabelFont {
  fn load() -> Self {
    for path in TRUETYPE_FONT_PATHS {
      if let Ok(data) = std::fs::read(path)
        && let Ok(font) = FontVec::try_from_vec(data)
      {
        debug!("加载 TrueType 字体: {}", path);
        return LabelFont::TrueType(font);
      }
    }
    // 字体缺失不致命，也不上报
    debug!("TrueType 字体不可用，使用内置点阵字体");
    LabelFont::Builtin
  }

  /// 测量文本渲染尺寸
  fn text_size(&self, text: &str) -> (i32, i32) {
    match self {
      LabelFont::TrueType(font) => {
        let (w, h) = text_size(PxScale::from(LABEL_FONT_SIZE), font, text);
        (w as i32, h as i32)
      }
      LabelFont::Builtin => (
        text.chars().count() as i32 * BUILTIN_GLYPH_SIZE,
        BUILTIN_GLYPH_SIZE,
      ),
    }
  }

  fn draw_text(&self, image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
    match self {
      LabelFont::TrueType(font) => {
        draw_text_mut(image, color, x, y, PxScale::from(LABEL_FONT_SIZE), font, text);
      }
      LabelFont::Builtin => draw_builtin_text(image, color, x, y, text),
    }
  }
}

fn draw_builtin_text(image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
  use font8x8::{BASIC_FONTS, UnicodeFonts};

  let mut cursor_x = x;
  for ch in text.chars() {
    if let Some(glyph) = BASIC_FONTS.get(ch) {
      for (row, bits) in glyph.iter().enumerate() {
        for col in 0..8i32 {
          if bits & (1u8 << col) == 0 {
            continue;
          }
          for dy in 0..BUILTIN_GLYPH_SCALE {
            for dx in 0..BUILTIN_GLYPH_SCALE {
              let px = cursor_x + col * BUILTIN_GLYPH_SCALE + dx;
              let py = y + row as i32 * BUILTIN_GLYPH_SCALE + dy;
              if px >= 0 && py >= 0 && (px as u32) < image.width() && (py as u32) < image.height()
              {
                image.put_pixel(px as u32, py as u32, color);
              }
            }
          }
        }
      }
    }
    cursor_x += BUILTIN_GLYPH_SIZE;
  }
}

/// 检测记录：单条检测面向表格展示的扁平化投影。
/// `confidence` 四舍五入保留 3 位小数（0.5 向远离零方向舍入），
/// 坐标由 `as` 转换向零截断取整。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  #[serde(rename = "Class")]
  pub class: String,
  #[serde(rename = "Confidence")]
  pub confidence: f32,
  #[serde(rename = "X1")]
  pub x1: i32,
  #[serde(rename = "Y1")]
  pub y1: i32,
  #[serde(rename = "X2")]
  pub x2: i32,
  #[serde(rename = "Y2")]
  pub y2: i32,
}

impl DetectionRecord {
  pub fn from_item<T: WithLabel>(item: &DetectItem<T>) -> Self {
    Self {
      class: item.kind.to_label_str(),
      confidence: (item.score * 1000.0).round() / 1000.0,
      x1: item.bbox[0] as i32,
      y1: item.bbox[1] as i32,
      x2: item.bbox[2] as i32,
      y2: item.bbox[3] as i32,
    }
  }

  pub fn from_result<T: WithLabel>(result: &DetectResult<T>) -> Vec<Self> {
    result.items.iter().map(Self::from_item).collect()
  }
}

pub struct Draw {
  font: LabelFont,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: LabelFont::load(),
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
    }
  }
}

impl Draw {
  /// 强制使用内置点阵字体，渲染结果与环境无关
  pub fn with_builtin_font() -> Self {
    Self {
      font: LabelFont::Builtin,
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
    }
  }

  // 在图像上绘制一个检测框和标签，bbox 为帧像素坐标
  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let x_min = item.bbox[0] as i32;
    let y_min = item.bbox[1] as i32;
    let x_max = item.bbox[2] as i32;
    let y_max = item.bbox[3] as i32;

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 描边宽度 3：逐层向内绘制空心矩形
    for thickness in 0..BOX_STROKE_WIDTH {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness)
        .of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }

    // 标签文本
    let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
    let (text_width, text_height) = self.font.text_size(&label);

    // 标签背景紧贴边框上缘，可能越过画布顶端，这里不做钳制
    let tag = Rect::at(x_min, y_min - text_height - LABEL_TAG_PADDING).of_size(
      (text_width + LABEL_TAG_PADDING) as u32,
      (text_height + LABEL_TAG_PADDING) as u32,
    );
    draw_filled_rect_mut(image, tag, self.box_color);

    self.font.draw_text(
      image,
      self.text_color,
      x_min + LABEL_TEXT_INSET,
      y_min - text_height - LABEL_TEXT_INSET,
      &label,
    );
  }
}

pub trait DrawDetectionOnImage<T: WithLabel> {
  /// 在同一遍历中完成标注绘制与记录提取，
  /// 返回的记录顺序与检测顺序一致。
  fn draw_detections_on_image(
    &self,
    image: &mut RgbImage,
    result: &DetectResult<T>,
  ) -> Vec<DetectionRecord>;
}

impl<T: WithLabel> DrawDetectionOnImage<T> for Draw {
  fn draw_detections_on_image(
    &self,
    image: &mut RgbImage,
    result: &DetectResult<T>,
  ) -> Vec<DetectionRecord> {
    let mut records = Vec::with_capacity(result.len());
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item);
      records.push(DetectionRecord::from_item(item));
    }
    records
  }
}

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> RgbImage;
}

impl ToRgbImage for RgbFrame {
  fn to_rgb_image(&self) -> RgbImage {
    self.as_image().clone()
  }
}

impl ToRgbImage for RgbImage {
  fn to_rgb_image(&self) -> RgbImage {
    self.clone()
  }
}

pub trait DrawDetectionOnFrame<FromFrame, T: WithLabel> {
  /// 在帧的副本上标注；调用方持有的帧不会被修改
  fn draw_detection(
    &self,
    frame: &FromFrame,
    result: &DetectResult<T>,
  ) -> (RgbImage, Vec<DetectionRecord>);
}

impl<FromFrame: ToRgbImage, T: WithLabel, D: DrawDetectionOnImage<T>>
  DrawDetectionOnFrame<FromFrame, T> for D
{
  fn draw_detection(
    &self,
    frame: &FromFrame,
    result: &DetectResult<T>,
  ) -> (RgbImage, Vec<DetectionRecord>) {
    let mut image = frame.to_rgb_image();
    let records = self.draw_detections_on_image(&mut image, result);
    (image, records)
  }
}
