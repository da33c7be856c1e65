use super::{Middleware, Next};
use crate::http::{request::Request, response::Response, response::Handled};
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Mutex;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 16;

/// Ensures `X-Request-Id` is present on both the request and the response.
/// Generates a 16-character lowercase-alphanumeric id from its own seeded
/// PRNG when the client didn't already supply one.
pub struct RequestId {
    rng: Mutex<StdRng>,
}

impl RequestId {
    pub fn new() -> Self {
        Self { rng: Mutex::new(StdRng::from_entropy()) }
    }

    fn generate(&self) -> String {
        let mut rng = self.rng.lock().expect("request-id rng mutex poisoned");
        (0..ID_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware for RequestId {
    async fn handle(&self, req: &mut Request, resp: &mut Response, next: Next<'_>) -> Handled {
        let id = match req.header("x-request-id") {
            Some(existing) => existing.to_string(),
            None => self.generate(),
        };
        req.headers_mut().set("x-request-id", id.clone());
        resp.header("x-request-id", id);
        next.run(req, resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_sixteen_lowercase_alphanumeric_chars() {
        let mw = RequestId::new();
        let id = mw.generate();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
