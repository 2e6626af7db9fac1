use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_RECONNECT_IVL_MS: i32 = 1_000;
pub const DEFAULT_RECONNECT_IVL_MAX_MS: i32 = 60_000;
pub const DEFAULT_HEARTBEAT_IVL_MS: i32 = 30_000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: i32 = 90_000;

pub type ZmqContext = Arc<zmq::Context>;

pub fn new_context() -> ZmqContext {
    Arc::new(zmq::Context::new())
}

/// Applies the standard reconnect/heartbeat/linger tuning shared by every
/// socket this crate opens. Centralized so a future change in retry posture
/// touches one place.
pub fn apply_standard_tuning(socket: &zmq::Socket) -> Result<(), zmq::Error> {
    socket.set_reconnect_ivl(DEFAULT_RECONNECT_IVL_MS)?;
    socket.set_reconnect_ivl_max(DEFAULT_RECONNECT_IVL_MAX_MS)?;
    socket.set_heartbeat_ivl(DEFAULT_HEARTBEAT_IVL_MS)?;
    socket.set_heartbeat_timeout(DEFAULT_HEARTBEAT_TIMEOUT_MS)?;
    socket.set_linger(0)?;
    Ok(())
}

pub fn create_dealer_and_connect(
    ctx: &ZmqContext,
    addr: &str,
    identity: Option<&str>,
) -> Result<tmq::dealer::Dealer, zmq::Error> {
    let raw = ctx.socket(zmq::DEALER)?;
    apply_standard_tuning(&raw)?;
    if let Some(id) = identity {
        raw.set_identity(id.as_bytes())?;
    }
    drop(raw);
    let socket = tmq::dealer(ctx).connect(addr).map_err(map_tmq_err)?;
    Ok(socket)
}

pub fn create_router_and_bind(ctx: &ZmqContext, addr: &str) -> Result<tmq::router::Router, zmq::Error> {
    let socket = tmq::router(ctx).bind(addr).map_err(map_tmq_err)?;
    Ok(socket)
}

fn map_tmq_err(e: tmq::TmqError) -> zmq::Error {
    match e {
        tmq::TmqError::Zmq(z) => z,
        _ => zmq::Error::EPROTO,
    }
}

pub fn reconnect_backoff(attempt: u32) -> Duration {
    let base = DEFAULT_RECONNECT_IVL_MS as u64;
    let max = DEFAULT_RECONNECT_IVL_MAX_MS as u64;
    Duration::from_millis(base.saturating_mul(1u64 << attempt.min(10)).min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_max() {
        assert!(reconnect_backoff(0) >= Duration::from_millis(DEFAULT_RECONNECT_IVL_MS as u64));
        assert_eq!(reconnect_backoff(20), Duration::from_millis(DEFAULT_RECONNECT_IVL_MAX_MS as u64));
    }
}
