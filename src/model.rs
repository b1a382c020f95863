// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

pub trait Model {
  type Input;
  type Output;
  type Error;

  /// 对一帧执行推理。`confidence` 为本次调用的置信度阈值，
  /// 低于阈值的候选在模型调用内部被丢弃，调用方不再过滤。
  fn infer(&self, input: &Self::Input, confidence: f32) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，帧像素坐标
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;
}

/// 商品类别数，与模型权重的检测头宽度一致
pub const PRODUCT_CLASS_NUM: usize = 18;

/// 货架商品的封闭类别集。类别顺序即训练时的类别编号，
/// 部署时固定，不随权重文件动态扩展。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductLabel {
  Cake,
  Candy,
  Cereal,
  Chips,
  Chocolate,
  Coffee,
  Fish,
  Honey,
  Jam,
  Milk,
  Oil,
  Pasta,
  Rice,
  Soda,
  Sugar,
  Tea,
  Vinegar,
  Water,
}

const PRODUCT_LABELS: [(ProductLabel, &str); PRODUCT_CLASS_NUM] = [
  (ProductLabel::Cake, "cake"),
  (ProductLabel::Candy, "candy"),
  (ProductLabel::Cereal, "cereal"),
  (ProductLabel::Chips, "chips"),
  (ProductLabel::Chocolate, "chocolate"),
  (ProductLabel::Coffee, "coffee"),
  (ProductLabel::Fish, "fish"),
  (ProductLabel::Honey, "honey"),
  (ProductLabel::Jam, "jam"),
  (ProductLabel::Milk, "milk"),
  (ProductLabel::Oil, "oil"),
  (ProductLabel::Pasta, "pasta"),
  (ProductLabel::Rice, "rice"),
  (ProductLabel::Soda, "soda"),
  (ProductLabel::Sugar, "sugar"),
  (ProductLabel::Tea, "tea"),
  (ProductLabel::Vinegar, "vinegar"),
  (ProductLabel::Water, "water"),
];

impl WithLabel for ProductLabel {
  fn to_label_str(&self) -> String {
    PRODUCT_LABELS
      .iter()
      .find(|(label, _)| label == self)
      .map(|(_, name)| (*name).to_string())
      .unwrap_or_default()
  }

  fn to_label_id(&self) -> u32 {
    PRODUCT_LABELS
      .iter()
      .position(|(label, _)| label == self)
      .unwrap_or_default() as u32
  }

  fn from_label_id(id: u32) -> Option<Self> {
    PRODUCT_LABELS
      .get(id as usize)
      .map(|(label, _)| *label)
  }
}

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{CONFIDENCE_MAX, CONFIDENCE_MIN, Yolov8, Yolov8Builder, Yolov8Error};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn label_ids_round_trip() {
    for id in 0..PRODUCT_CLASS_NUM as u32 {
      let label = ProductLabel::from_label_id(id).unwrap();
      assert_eq!(label.to_label_id(), id);
    }
  }

  #[test]
  fn label_names_match_training_order() {
    assert_eq!(ProductLabel::from_label_id(0), Some(ProductLabel::Cake));
    assert_eq!(ProductLabel::from_label_id(13), Some(ProductLabel::Soda));
    assert_eq!(ProductLabel::Soda.to_label_str(), "soda");
    assert_eq!(ProductLabel::Water.to_label_id(), 17);
  }

  #[test]
  fn out_of_range_id_has_no_label() {
    assert_eq!(ProductLabel::from_label_id(PRODUCT_CLASS_NUM as u32), None);
  }

  #[test]
  fn empty_result_reports_empty() {
    let result: DetectResult<ProductLabel> = DetectResult { items: Box::new([]) };
    assert!(result.is_empty());
    assert_eq!(result.len(), 0);
  }
}
