//! Two-stage pipeline: four parallel primality checkers feed one counter.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use girder::{MessageId, MessageManager};

const CHECK: MessageId = 1;
const COUNT: MessageId = 2;

fn is_prime(n: u64) -> bool {
    if n < 4 {
        return n >= 2;
    }
    if n % 2 == 0 || n % 3 == 0 {
        return false;
    }
    let mut d = 5;
    while d * d <= n {
        if n % d == 0 || n % (d + 2) == 0 {
            return false;
        }
        d += 6;
    }
    true
}

#[test]
fn parallel_checkers_count_primes_in_a_large_range() {
    let manager = Arc::new(MessageManager::<u64>::new());
    let primes = Arc::new(AtomicUsize::new(0));

    {
        let primes = Arc::clone(&primes);
        manager
            .add_handler(COUNT, move |_| {
                primes.fetch_add(1, Ordering::SeqCst);
            })
            .expect("add count handler");
    }
    for _ in 0..4 {
        let forward = Arc::clone(&manager);
        manager
            .add_handler(CHECK, move |candidate| {
                if is_prime(candidate) {
                    forward.send_message(COUNT, candidate, 0);
                }
            })
            .expect("add check handler");
    }

    for candidate in 10_000_000_001u64..10_000_100_001 {
        manager.send_message(CHECK, candidate, 0);
    }

    // Once the check queue drains, every prime has been forwarded; once the
    // count queue drains, every forward has been counted.
    manager.wait_until_empty(CHECK);
    manager.wait_until_empty(COUNT);

    assert_eq!(primes.load(Ordering::SeqCst), 4306);

    manager.dispose(CHECK);
    manager.dispose(COUNT);
}
