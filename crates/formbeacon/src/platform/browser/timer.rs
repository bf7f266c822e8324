use futures_util::future::LocalBoxFuture;
use zoon::Timer;

use crate::challenge::wait::Sleeper;

pub struct ZoonSleeper;

impl Sleeper for ZoonSleeper {
    fn sleep(&self, duration_ms: u32) -> LocalBoxFuture<'static, ()> {
        Box::pin(Timer::sleep(duration_ms))
    }
}
