//! Supervisor Loop (C7): polls every active work item for its stop
//! conditions, retires what's ready, sleeps otherwise. Guarantees no rank
//! returns from [`run`] until its view of active work is empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cluster_client::entities::node::NodeDescriptor;
use collective::Transport;
use tracing::info;

use crate::config::launcher_config;
use crate::executor::{self, StopDecision};
use crate::state::active_work;

/// Runs until every entry in [`active_work`] has been retired.
/// `term_signal` is flipped by `main`'s signal handler and read once per
/// iteration (condition 3 of §4.5's stop conditions).
pub async fn run<T: Transport>(
  transport: &T,
  node: &NodeDescriptor,
  term_signal: &AtomicBool,
) -> anyhow::Result<()> {
  let poll_interval = launcher_config().poll_interval;

  loop {
    let mut work = active_work().lock().await;
    if work.is_empty() {
      return Ok(());
    }

    let now = Instant::now();
    let signaled = term_signal.load(Ordering::Relaxed);
    let mut retired_this_round = false;
    let mut still_active = Vec::with_capacity(work.len());

    for mut item in std::mem::take(&mut *work) {
      match executor::work_wait(&item, now, signaled) {
        StopDecision::Continue => still_active.push(item),
        StopDecision::Stop(reason) => {
          info!(
            service = %item.name,
            reason = ?reason,
            "stop condition met, retiring"
          );
          executor::stop(transport, &mut item, node).await?;
          retired_this_round = true;
        }
      }
    }
    *work = still_active;
    drop(work);

    if !retired_this_round {
      tokio::time::sleep(poll_interval).await;
    }
  }
}
