mod session;

use crate::frame::FramePool;
use sim::{Shared, SimChannel};

pub(crate) fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A simulated socket with a registered UMEM of 64 frames, ready for ring
/// configuration.
pub(crate) fn registered_sim() -> (SimChannel, Shared, FramePool) {
    init_logger();
    let (channel, state) = SimChannel::new().unwrap();
    let pool = FramePool::allocate(64, 2048, 0, Some(false)).unwrap();
    pool.register(&channel).unwrap();
    (channel, state, pool)
}
