// 该文件是 Huojia （货架甄识） 项目的一部分。
// src/task.rs - 任务定义
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

use tracing::info;

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  type Outcome;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Outcome, Self::Error>;
}

/// 单次任务：取一帧，按给定阈值推理，渲染输出，
/// 并把检测结果交还调用方做表格展示。
pub struct OneShotTask {
  confidence: f32,
}

impl OneShotTask {
  pub fn with_confidence(confidence: f32) -> Self {
    Self { confidence }
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;
  type Outcome = D;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Outcome, Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = std::time::Instant::now();
    let result = model.infer(&frame, self.confidence)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[derive(Debug, thiserror::Error)]
  #[error("stub error")]
  struct StubError;

  struct StubModel;

  impl Model for StubModel {
    type Input = u8;
    type Output = Vec<f32>;
    type Error = StubError;

    fn infer(&self, input: &u8, confidence: f32) -> Result<Vec<f32>, StubError> {
      assert_eq!(*input, 7);
      Ok(vec![confidence])
    }
  }

  struct StubRender(Arc<AtomicUsize>);

  impl Render<u8, Vec<f32>> for StubRender {
    type Error = StubError;

    fn render_result(&self, _frame: &u8, _result: &Vec<f32>) -> Result<(), StubError> {
      self.0.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[test]
  fn oneshot_runs_single_frame_and_returns_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let result = OneShotTask::with_confidence(0.25)
      .run_task([7u8].into_iter(), StubModel, StubRender(calls.clone()))
      .unwrap();

    assert_eq!(result, vec![0.25]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn oneshot_without_frames_is_an_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let outcome = OneShotTask::with_confidence(0.25).run_task(
      std::iter::empty::<u8>(),
      StubModel,
      StubRender(calls.clone()),
    );

    assert!(outcome.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }
}
