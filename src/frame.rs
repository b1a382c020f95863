// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;

/// 帧长边上限，超出后输入源会等比缩放
pub const MAX_FRAME_EDGE: u32 = 1280;

/// 流经管线的一帧图像：已转正（EXIF 方向归一）、RGB、长边不超过
/// [`MAX_FRAME_EDGE`]。帧在管线中只读，标注时需先复制。
#[derive(Debug, Clone)]
pub struct RgbFrame {
  image: RgbImage,
}

impl RgbFrame {
  pub fn new(image: RgbImage) -> Self {
    Self { image }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub fn into_inner(self) -> RgbImage {
    self.image
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    Self::new(image)
  }
}
