use std::time::Duration;

use rand::Rng;

/// Picks a uniformly random duration in `[min, max]`.
pub fn jitter(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let secs = rand::rng().random_range(min.as_secs_f64()..=max.as_secs_f64());
    Duration::from_secs_f64(secs).clamp(min, max)
}

/// Sleeps for a random duration in `[min, max]` and returns how long it slept.
pub async fn sleep_jittered(min: Duration, max: Duration) -> Duration {
    let delay = jitter(min, max);
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    delay
}
