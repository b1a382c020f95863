// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/bin/simple_oneshot.rs - 单次检测入口
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use anyhow::Result;
use clap::Parser;
use url::Url;

use huojia::{
  FromUrl,
  input::ImageFileInput,
  model::{CONFIDENCE_MAX, CONFIDENCE_MIN, DetectResult, ProductLabel, Yolov8Builder},
  output::{OutputWrapper, draw::DetectionRecord},
  task::{OneShotTask, Task},
};
use tracing::info;

/// Huojia 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径 (onnx:///path/to/best.onnx)
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图片 (image:///path/to/shelf.jpg，仅限 JPEG/PNG)
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径 (image:///path/to/out.png 或 folder:///path/to/dir)
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 置信度阈值 [0.05, 1.0]
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,
}

fn print_table(records: &[DetectionRecord]) {
  if records.is_empty() {
    println!("未检测到任何商品 (no objects detected)");
    return;
  }

  println!(
    "{:<12} {:>10} {:>6} {:>6} {:>6} {:>6}",
    "Class", "Confidence", "X1", "Y1", "X2", "Y2"
  );
  for record in records {
    println!(
      "{:<12} {:>10.3} {:>6} {:>6} {:>6} {:>6}",
      record.class, record.confidence, record.x1, record.y1, record.x2, record.y2
    );
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let confidence = args.confidence.clamp(CONFIDENCE_MIN, CONFIDENCE_MAX);
  info!("置信度阈值: {}", confidence);

  // 模型加载失败是启动期致命错误，在打开输入之前完成
  let model = Yolov8Builder::from_url(&args.model)?.build()?;
  let input = ImageFileInput::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&args.output)?;

  let result: DetectResult<ProductLabel> =
    OneShotTask::with_confidence(confidence).run_task(input, model, output)?;

  print_table(&DetectionRecord::from_result(&result));

  Ok(())
}
