//! Basic resilience gate usage example

use gate_machines::{BackoffRetry, Bulkhead, TimeLimiter, bulkhead, retry, time_limit};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

async fn flaky_payment(attempt: usize) -> Result<String, String> {
    // The first two calls fail, the third succeeds
    if attempt < 2 {
        Err(format!("Payment gateway unavailable (call {})", attempt + 1))
    } else {
        Ok(format!("Payment confirmed (call {})", attempt + 1))
    }
}

#[tokio::main]
async fn main() {
    println!("=== Resilience Gates Basic Example ===\n");

    // Retry a flaky call with a short fixed backoff
    println!("--- Retrying a flaky call ---");
    let retry_policy = Arc::new(
        BackoffRetry::builder("payment_api")
            .max_attempts(3)
            .fixed_delay(Duration::from_millis(100))
            .build(),
    );
    let calls = Arc::new(AtomicUsize::new(0));
    let probe = calls.clone();

    let result = retry::execute(retry_policy, move || {
        let attempt = probe.fetch_add(1, Ordering::SeqCst);
        async move { flaky_payment(attempt).await }
    })
    .await;
    match result {
        Ok(confirmation) => println!("✓ {}", confirmation),
        Err(e) => println!("✗ {}", e),
    }
    println!("Calls made: {}\n", calls.load(Ordering::SeqCst));

    // Cap concurrency with a bulkhead
    println!("--- Bulkhead with two slots ---");
    let slots = Arc::new(Bulkhead::new("payment_api", 2));
    let mut pending = Vec::new();
    for i in 1..=4 {
        pending.push(bulkhead::execute(slots.clone(), move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, String>(format!("Payment {}", i))
        }));
    }
    for execution in pending {
        match execution.await {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("Available slots after the burst: {}\n", slots.available());

    // Bound a slow call with a time limiter
    println!("--- Time limiting a slow call ---");
    let limiter = Arc::new(TimeLimiter::new("payment_api", Duration::from_millis(200)));
    let result = time_limit::execute(limiter, || async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<String, String>("Should have timed out".to_string())
    })
    .await;
    match result {
        Ok(r) => println!("✓ {}", r),
        Err(e) => println!("✗ {}", e),
    }
}
