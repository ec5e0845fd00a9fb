use crewlab_job_manager::{Work, WorkContext};

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

pub async fn answer(_ctx: WorkContext) -> anyhow::Result<Value> {
	Ok(json!({ "answer": 42 }))
}

pub async fn echo_context(ctx: WorkContext) -> anyhow::Result<Value> {
	Ok(json!({
		"job_id": ctx.job_id,
		"ticker": ctx.ticker,
		"crew_name": ctx.crew_name,
		"user_id": ctx.user_id,
	}))
}

pub async fn market_closed(_ctx: WorkContext) -> anyhow::Result<Value> {
	Err(anyhow!("market closed"))
}

pub async fn explode(_ctx: WorkContext) -> anyhow::Result<Value> {
	panic!("work exploded");
}

/// A work that tells when it started and then holds its worker until released
pub struct GatedWork {
	began_tx: Mutex<Option<oneshot::Sender<()>>>,
	release_rx: Mutex<Option<oneshot::Receiver<()>>>,
	progress: Option<i64>,
	result: Value,
}

impl GatedWork {
	pub fn new(result: Value) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
		let (began_tx, began_rx) = oneshot::channel();
		let (release_tx, release_rx) = oneshot::channel();

		(
			Self {
				began_tx: Mutex::new(Some(began_tx)),
				release_rx: Mutex::new(Some(release_rx)),
				progress: None,
				result,
			},
			began_rx,
			release_tx,
		)
	}

	/// Reports `progress` through its context right before signaling it began
	pub fn reporting(mut self, progress: i64) -> Self {
		self.progress = Some(progress);
		self
	}
}

#[async_trait]
impl Work for GatedWork {
	async fn run(&self, ctx: WorkContext) -> anyhow::Result<Value> {
		if let Some(progress) = self.progress {
			assert!(ctx.report_progress(progress, Some("warming up")));
		}

		let began_tx = self.began_tx.lock().take();
		if let Some(began_tx) = began_tx {
			began_tx.send(()).ok();
		}

		let release_rx = self.release_rx.lock().take();
		if let Some(release_rx) = release_rx {
			release_rx.await.ok();
		}

		Ok(self.result.clone())
	}
}
