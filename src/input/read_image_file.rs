// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use crate::{
  FromUrl,
  frame::{MAX_FRAME_EDGE, RgbFrame},
};

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, metadata::Orientation};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
  #[error("不支持的图像格式: {0}")]
  UnsupportedFormat(String),
}

impl From<std::io::Error> for ImageFileInputError {
  fn from(err: std::io::Error) -> Self {
    ImageFileInputError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileInputError {
  fn from(err: image::ImageError) -> Self {
    ImageFileInputError::ImageLoadError(err)
  }
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

// 上传入口只接受 JPEG 与 PNG
const ALLOWED_FORMATS: &[ImageFormat] = &[ImageFormat::Jpeg, ImageFormat::Png];

pub struct ImageFileInput {
  frame: Option<RgbFrame>,
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != READ_IMAGE_FILE_SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        READ_IMAGE_FILE_SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url.path();
    let reader = ImageReader::open(path)?.with_guessed_format()?;

    // 按文件内容识别格式，不信任扩展名
    match reader.format() {
      Some(format) if ALLOWED_FORMATS.contains(&format) => {}
      format => {
        error!("图像格式不在允许列表内: {:?}", format);
        return Err(ImageFileInputError::UnsupportedFormat(format!(
          "{:?}",
          format
        )));
      }
    }

    let mut decoder = reader.into_decoder()?;
    // EXIF 方向信息缺失或损坏时按原样处理
    let orientation = decoder
      .orientation()
      .unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);

    let image = if image.width().max(image.height()) > MAX_FRAME_EDGE {
      debug!(
        "图像 {}x{} 超过长边上限 {}，等比缩放",
        image.width(),
        image.height(),
        MAX_FRAME_EDGE
      );
      image.thumbnail(MAX_FRAME_EDGE, MAX_FRAME_EDGE)
    } else {
      image
    };

    Ok(ImageFileInput {
      frame: Some(RgbFrame::new(image.to_rgb8())),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}
