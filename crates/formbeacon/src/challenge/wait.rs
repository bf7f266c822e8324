//! Waiting for the challenge script to publish its global.

use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use super::{ChallengeApi, ChallengeGlobal};

/// Timer source. The browser uses `zoon::Timer`; tests complete at once.
pub trait Sleeper {
    fn sleep(&self, duration_ms: u32) -> LocalBoxFuture<'static, ()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval_ms: u32,
    /// `None` polls until cancelled.
    pub max_attempts: Option<u32>,
}

/// Outcome of [`wait_for_global`].
pub enum WaitOutcome<N> {
    Ready(Rc<dyn ChallengeApi<N>>),
    GaveUp { attempts: u32 },
}

/// Sleep, look the global up, repeat. Checks only after sleeping: callers
/// look it up once themselves before starting the wait.
pub async fn wait_for_global<N: 'static>(
    global: Rc<dyn ChallengeGlobal<N>>,
    sleeper: Rc<dyn Sleeper>,
    schedule: PollSchedule,
) -> WaitOutcome<N> {
    let mut attempts = 0;
    loop {
        if schedule.max_attempts.is_some_and(|max| attempts >= max) {
            return WaitOutcome::GaveUp { attempts };
        }
        sleeper.sleep(schedule.interval_ms).await;
        attempts += 1;
        if let Some(api) = global.lookup() {
            log::debug!("[Turnstile] global available after {attempts} poll(s)");
            return WaitOutcome::Ready(api);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{FakeChallengeGlobal, InstantSleeper, MemoryNode};
    use futures::executor::block_on;

    #[test]
    fn resolves_when_global_appears() {
        let global = Rc::new(FakeChallengeGlobal::new());
        let sleeper = Rc::new(InstantSleeper::new());
        sleeper.on_sleep({
            let global = global.clone();
            move |count| {
                if count == 3 {
                    global.install();
                }
            }
        });
        let outcome = block_on(wait_for_global::<MemoryNode>(
            global.clone(),
            sleeper.clone(),
            PollSchedule {
                interval_ms: 1000,
                max_attempts: None,
            },
        ));
        assert!(matches!(outcome, WaitOutcome::Ready(_)));
        assert_eq!(sleeper.slept(), 3);
        assert_eq!(global.lookups(), 3);
    }

    #[test]
    fn gives_up_after_bound() {
        let global = Rc::new(FakeChallengeGlobal::new());
        let sleeper = Rc::new(InstantSleeper::new());
        let outcome = block_on(wait_for_global::<MemoryNode>(
            global,
            sleeper.clone(),
            PollSchedule {
                interval_ms: 10,
                max_attempts: Some(4),
            },
        ));
        assert!(matches!(outcome, WaitOutcome::GaveUp { attempts: 4 }));
        assert_eq!(sleeper.slept(), 4);
    }
}
