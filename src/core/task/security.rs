//! Security access seed/key handshake
//!
//! Odd sub-functions request a seed; even sub-functions send the key.
//! The key is the seed XOR the shared secret (secret cycled over the seed).
//! A matching key unlocks memory access for the rest of the session.

use rand::Rng;
use std::time::{Duration, Instant};

use super::{Task, TaskContext, TaskOutcome};
use crate::core::uds::{service_id, to_hex, Nrc};

/// Seed length in bytes
pub const SEED_LEN: usize = 4;

/// Seed/key handshake task
#[derive(Debug)]
pub struct SecurityAccess {
    secret: Vec<u8>,
    delay: Duration,
    started: Instant,
    sub_function: u8,
    seed: Vec<u8>,
}

impl SecurityAccess {
    /// Create a handshake step with `secret`; seeds are released after `delay`
    pub fn new(secret: Vec<u8>, delay: Duration) -> Self {
        Self {
            secret,
            delay,
            started: Instant::now(),
            sub_function: 0,
            seed: Vec::new(),
        }
    }

    /// Key expected for `seed`
    pub fn expected_key(seed: &[u8], secret: &[u8]) -> Vec<u8> {
        if secret.is_empty() {
            return seed.to_vec();
        }
        seed.iter()
            .enumerate()
            .map(|(i, b)| b ^ secret[i % secret.len()])
            .collect()
    }

    fn release_seed(&self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        if Instant::now() < self.started + self.delay {
            return TaskOutcome::Continue(cx.pending(service_id::SECURITY_ACCESS));
        }

        tracing::info!("Security access: providing seed {}", to_hex(&self.seed));
        cx.shared.seed = Some(self.seed.clone());
        cx.shared.security_unlocked = false;

        let mut data = vec![self.sub_function];
        data.extend_from_slice(&self.seed);
        TaskOutcome::Answer(cx.positive(service_id::SECURITY_ACCESS, &data))
    }

    fn check_key(&self, cx: &mut TaskContext<'_>, key: &[u8]) -> TaskOutcome {
        let Some(seed) = cx.shared.seed.take() else {
            tracing::info!("Security access: key sent without a seed");
            return TaskOutcome::Error(Nrc::RequestSequenceError);
        };

        if key == Self::expected_key(&seed, &self.secret).as_slice() {
            tracing::info!("Security access: key accepted");
            cx.shared.security_unlocked = true;
            TaskOutcome::Answer(cx.positive(service_id::SECURITY_ACCESS, &[self.sub_function]))
        } else {
            tracing::info!("Security access: invalid key {}", to_hex(key));
            cx.shared.security_unlocked = false;
            TaskOutcome::Error(Nrc::InvalidKey)
        }
    }
}

impl Task for SecurityAccess {
    fn service_id(&self) -> u8 {
        service_id::SECURITY_ACCESS
    }

    fn start(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        let request = match cx.request() {
            Some(r) if r.len() >= 2 && r[0] == service_id::SECURITY_ACCESS => r,
            _ => return TaskOutcome::Error(Nrc::IncorrectMessageLengthOrFormat),
        };
        self.sub_function = request[1];

        if self.sub_function % 2 == 1 {
            let mut rng = rand::thread_rng();
            self.seed = (0..SEED_LEN).map(|_| rng.gen_range(1..=0xFF)).collect();
            self.release_seed(cx)
        } else {
            self.check_key(cx, &request[2..])
        }
    }

    fn run(&mut self, cx: &mut TaskContext<'_>) -> TaskOutcome {
        // only a repeat of the pending seed request is polled
        match cx.request() {
            Some(r)
                if r.len() == 2
                    && r[0] == service_id::SECURITY_ACCESS
                    && r[1] == self.sub_function =>
            {
                self.release_seed(cx)
            }
            _ => {
                tracing::info!("Security access: request interrupted a pending seed");
                TaskOutcome::Error(Nrc::RequestSequenceError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::test_support::Harness;
    use crate::core::uds::parse_hex;

    fn seed_from(answer: &str) -> Vec<u8> {
        let data = answer
            .split("<data>")
            .nth(1)
            .and_then(|s| s.split("</data>").next())
            .unwrap();
        parse_hex(data).unwrap()[2..].to_vec()
    }

    #[test]
    fn test_handshake_unlocks() {
        let mut h = Harness::new();
        let secret = vec![0xDE, 0xAD];

        let mut seed_task = SecurityAccess::new(secret.clone(), Duration::ZERO);
        let TaskOutcome::Answer(answer) = h.start(&mut seed_task, "2701") else {
            panic!("expected seed");
        };
        let seed = seed_from(&answer);
        assert_eq!(seed.len(), SEED_LEN);
        assert_eq!(h.shared.seed.as_deref(), Some(seed.as_slice()));

        let key = SecurityAccess::expected_key(&seed, &secret);
        let mut key_task = SecurityAccess::new(secret, Duration::ZERO);
        let outcome = h.start(&mut key_task, &format!("2702{}", hex::encode_upper(key)));
        assert_eq!(
            outcome,
            TaskOutcome::Answer("<header>7E8</header><size>02</size><data>67 02</data>".into())
        );
        assert!(h.shared.security_unlocked);
    }

    #[test]
    fn test_wrong_key() {
        let mut h = Harness::new();
        h.shared.seed = Some(vec![1, 2, 3, 4]);
        let mut task = SecurityAccess::new(vec![0xFF], Duration::ZERO);
        assert_eq!(h.start(&mut task, "270200000000"), TaskOutcome::Error(Nrc::InvalidKey));
        assert!(!h.shared.security_unlocked);
    }

    #[test]
    fn test_key_without_seed() {
        let mut h = Harness::new();
        let mut task = SecurityAccess::new(vec![0xFF], Duration::ZERO);
        assert_eq!(
            h.start(&mut task, "2702FEFDFCFB"),
            TaskOutcome::Error(Nrc::RequestSequenceError)
        );
    }

    #[test]
    fn test_seed_is_time_gated() {
        let mut h = Harness::new();
        let mut task = SecurityAccess::new(vec![0xFF], Duration::from_millis(100));
        assert!(h.start(&mut task, "2701").is_continue());
        assert!(h.shared.seed.is_none());
        std::thread::sleep(Duration::from_millis(150));
        assert!(matches!(h.run(&mut task, "2701"), TaskOutcome::Answer(_)));
        assert!(h.shared.seed.is_some());
    }

    #[test]
    fn test_key_while_seed_pending() {
        let mut h = Harness::new();
        let mut task = SecurityAccess::new(vec![0xFF], Duration::from_millis(500));
        assert!(h.start(&mut task, "2701").is_continue());
        assert_eq!(
            h.run(&mut task, "270200000000"),
            TaskOutcome::Error(Nrc::RequestSequenceError)
        );
        assert!(h.shared.seed.is_none());

        let mut task = SecurityAccess::new(vec![0xFF], Duration::from_millis(500));
        assert!(h.start(&mut task, "2701").is_continue());
        assert_eq!(h.run(&mut task, "2703"), TaskOutcome::Error(Nrc::RequestSequenceError));
    }
}
