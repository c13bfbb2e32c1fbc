use time::format_description;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Sends every event of the test to stdout, captured by the test harness.
#[allow(dead_code)]
pub fn init_test_logger() {
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[hour]:[minute]:[second]").unwrap(),
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_timer(timer)
        .with_test_writer()
        .finish();

    // several tests of the same binary may race to install it
    let _ = tracing::subscriber::set_global_default(subscriber);
}
