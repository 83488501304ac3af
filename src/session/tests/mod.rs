use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::RngCore;

use crate::types::SessionConfig;

mod state;

fn seeded(seed: u64) -> Box<dyn RngCore + Send> {
    Box::new(StdRng::seed_from_u64(seed))
}

fn test_config() -> SessionConfig {
    SessionConfig::builder()
        .bandwidth(10_000.0)
        .cname("tester@localhost")
        .build()
}

fn fast_config() -> SessionConfig {
    SessionConfig::builder()
        .bandwidth(10_000.0)
        .rtcp_min_time(Duration::from_millis(100))
        .cname("tester@localhost")
        .build()
}
