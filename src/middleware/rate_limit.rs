use super::{Middleware, Next};
use crate::{
    errors::CwistError,
    http::{request::Request, response::Handled, response::Response},
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Mutex,
    time::{SystemTime, UNIX_EPOCH},
};

/// Bounded table of at most `MAX_IP_TRACK` entries so an attacker spraying
/// source IPs cannot grow the table without limit.
const MAX_IP_TRACK: usize = 1024;
const WINDOW_SECS: u64 = 60;

struct Window {
    started_at: u64,
    count: u32,
}

/// Fixed-window rate limiter by client IP. Owns its own table and mutex —
/// two `RateLimit` instances, even in the same process, never share state.
pub struct RateLimit {
    requests_per_minute: u32,
    table: Mutex<HashMap<IpAddr, Window>>,
}

impl RateLimit {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute,
            table: Mutex::new(HashMap::new()),
        }
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs()
}

#[async_trait]
impl Middleware for RateLimit {
    async fn handle(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> Handled {
        let ip = req.client_addr().ip();
        let now = now_epoch_secs();

        let limited = {
            let mut table = self.table.lock().expect("rate limit mutex poisoned");

            if !table.contains_key(&ip) && table.len() >= MAX_IP_TRACK {
                // Table is full of other clients' windows; evict the
                // stalest one rather than growing unbounded.
                if let Some(oldest_ip) = table
                    .iter()
                    .min_by_key(|(_, w)| w.started_at)
                    .map(|(ip, _)| *ip)
                {
                    table.remove(&oldest_ip);
                }
            }

            let window = table.entry(ip).or_insert(Window { started_at: now, count: 0 });
            if now.saturating_sub(window.started_at) >= WINDOW_SECS {
                window.started_at = now;
                window.count = 0;
            }
            window.count += 1;
            window.count > self.requests_per_minute
        };

        if limited {
            let error = CwistError::RateLimited;
            return resp
                .status(error.status())
                .header("retry-after", WINDOW_SECS)
                .body(error.json_body());
        }

        next.run(req, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_resets_after_sixty_seconds() {
        let mut window = Window { started_at: 0, count: 60 };
        let now = 61;
        if now.saturating_sub(window.started_at) >= WINDOW_SECS {
            window.started_at = now;
            window.count = 0;
        }
        assert_eq!(window.count, 0);
    }
}
