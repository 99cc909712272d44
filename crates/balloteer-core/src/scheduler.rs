//! Auto-close timers and the periodic sweep.
//!
//! Timers never touch engine state. When one fires it enqueues an
//! [`Command::AutoCloseCheck`] on the engine's inbound channel, so the check
//! runs serially with every other command. Timers are not cancelled when a
//! proposal closes early; the check is a no-op for a closed proposal.
//!
//! The scheduler only holds weak senders. Once every producer of inbound
//! commands is gone the channel closes and pending timers exit quietly.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::{Sender, WeakSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use balloteer_types::{Command, Deadline};

/// Arms deadline timers and runs the sweep against one inbound channel.
#[derive(Debug, Clone)]
pub struct AutoCloseScheduler {
    inbound: WeakSender<Command>,
}

impl AutoCloseScheduler {
    /// A scheduler feeding `inbound`.
    pub fn new(inbound: &Sender<Command>) -> Self {
        Self {
            inbound: inbound.downgrade(),
        }
    }

    /// Arm a one-shot timer for `deadline`. A deadline in the past fires
    /// immediately.
    pub fn arm(&self, deadline: Deadline) -> JoinHandle<()> {
        let delay = deadline
            .ends_at
            .signed_duration_since(Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let inbound = self.inbound.clone();
        debug!(
            community_id = %deadline.community_id,
            proposal_id = %deadline.proposal_id,
            delay_secs = delay.as_secs(),
            "Auto-close timer armed"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(sender) = inbound.upgrade() else {
                return;
            };
            let check = Command::AutoCloseCheck {
                community_id: deadline.community_id,
                proposal_id: deadline.proposal_id,
            };
            if sender.send(check).await.is_err() {
                debug!("Inbound channel closed before timer fired");
            }
        })
    }

    /// Arm every deadline in `deadlines`, e.g. the open ones found at boot.
    pub fn arm_all(&self, deadlines: impl IntoIterator<Item = Deadline>) -> usize {
        let mut armed = 0_usize;
        for deadline in deadlines {
            self.arm(deadline);
            armed = armed.saturating_add(1);
        }
        armed
    }

    /// Enqueue a [`Command::Sweep`] every `period` until the channel closes.
    pub fn spawn_sweep(&self, period: Duration) -> JoinHandle<()> {
        let inbound = self.inbound.clone();
        info!(period_secs = period.as_secs(), "Sweep scheduled");
        tokio::spawn(async move {
            let start = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(sender) = inbound.upgrade() else {
                    break;
                };
                if sender.send(Command::Sweep).await.is_err() {
                    break;
                }
            }
            debug!("Sweep stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use tokio::sync::mpsc;

    use balloteer_types::{CommunityId, ProposalId};

    use super::*;

    fn deadline_in(secs: i64) -> Deadline {
        Deadline {
            community_id: CommunityId::new(-100),
            proposal_id: ProposalId::new(1),
            ends_at: Utc::now() + ChronoDuration::seconds(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_enqueues_auto_close_check() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = AutoCloseScheduler::new(&tx);
        scheduler.arm(deadline_in(60));

        let fired = rx.recv().await.unwrap();
        assert_eq!(
            fired,
            Command::AutoCloseCheck {
                community_id: CommunityId::new(-100),
                proposal_id: ProposalId::new(1),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn past_deadline_fires_immediately() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = AutoCloseScheduler::new(&tx);
        assert_eq!(scheduler.arm_all([deadline_in(-30), deadline_in(-5)]), 2);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_ticks_after_each_period() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = AutoCloseScheduler::new(&tx);
        scheduler.spawn_sweep(Duration::from_secs(30));

        assert_eq!(rx.recv().await.unwrap(), Command::Sweep);
        assert_eq!(rx.recv().await.unwrap(), Command::Sweep);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_exit_once_producers_are_gone() {
        let (tx, mut rx) = mpsc::channel(8);
        let scheduler = AutoCloseScheduler::new(&tx);
        let sweep = scheduler.spawn_sweep(Duration::from_secs(1));
        drop(tx);

        sweep.await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
