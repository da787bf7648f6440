use std::time::SystemTime;

/// Read the time since the Unix epoch in whole seconds. Returns 0 if the
/// system-reported time is somehow before the Unix epoch.
#[must_use]
pub fn current_unix_time() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or_else(
            |err| {
                log::error!("System time is before the Unix epoch: {err}");
                0
            },
            |duration| duration.as_secs(),
        )
}
