use super::*;
use std::thread;

fn frame(start: u32, len: usize) -> Vec<f32> {
    (0..len).map(|i| (start as f32) + i as f32).collect()
}

#[test]
fn test_capacity_rounds_to_power_of_two() {
    let ring = IqRing::new(1000, 16).unwrap();
    assert_eq!(ring.capacity(), 1024);
}

#[test]
fn test_zero_capacity_rejected() {
    assert_eq!(IqRing::new(0, 16).unwrap_err(), RingError::ZeroCapacity);
}

#[test]
fn test_publish_then_read() {
    let ring = IqRing::new(64, 8).unwrap();
    let mut cons = ring.subscribe();
    let data = frame(0, 8);
    ring.publish(&data);

    let mut buf = vec![0.0; 8];
    let r = cons.read(&mut buf);
    assert_eq!(r.n, 8);
    assert_eq!(r.slipped, 0);
    assert_eq!(buf, data);
    assert_eq!(cons.lag(), 0);
}

#[test]
fn test_late_subscriber_sees_only_future_samples() {
    let ring = IqRing::new(64, 8).unwrap();
    ring.publish(&frame(0, 16));

    let mut cons = ring.subscribe();
    assert_eq!(cons.lag(), 0);

    ring.publish(&frame(100, 4));
    let mut buf = vec![0.0; 16];
    let r = cons.read(&mut buf);
    assert_eq!(r.n, 4);
    assert_eq!(&buf[..4], &frame(100, 4)[..]);
}

#[test]
fn test_wraparound_preserves_order() {
    let ring = IqRing::new(16, 4).unwrap();
    let mut cons = ring.subscribe();
    let mut buf = vec![0.0; 16];

    // Push several capacities worth of data, reading everything back.
    for i in 0..20u32 {
        ring.publish(&frame(i * 6, 6));
        let r = cons.read(&mut buf);
        assert_eq!(r.n, 6);
        assert_eq!(r.slipped, 0);
        assert_eq!(&buf[..6], &frame(i * 6, 6)[..]);
    }
    assert_eq!(ring.committed(), 120);
}

#[test]
fn test_independent_consumers() {
    let ring = IqRing::new(64, 8).unwrap();
    let mut a = ring.subscribe();
    let mut b = ring.subscribe();
    ring.publish(&frame(0, 8));

    let mut buf = vec![0.0; 8];
    assert_eq!(a.read(&mut buf).n, 8);
    // b has not read yet and still sees the data.
    assert_eq!(b.lag(), 8);
    assert_eq!(b.read(&mut buf).n, 8);
    assert_eq!(buf, frame(0, 8));
}

#[test]
fn test_slow_consumer_is_reset_not_blocking() {
    let ring = IqRing::new(32, 4).unwrap();
    let mut cons = ring.subscribe();

    // Publish far beyond capacity without the consumer reading at all.
    for i in 0..40u32 {
        ring.publish(&frame(i, 4));
    }
    assert_eq!(ring.committed(), 160);

    // The consumer was swept forward instead of stalling the producer.
    assert!(cons.slip_count() >= 1);
    assert!(cons.lag() <= ring.capacity());

    let mut buf = vec![0.0; 8];
    let r = cons.read(&mut buf);
    assert!(r.slipped >= 1);
    assert!(r.n > 0);
}

#[test]
fn test_bounded_lag_invariant() {
    let ring = IqRing::new(32, 4).unwrap();
    let cons = ring.subscribe();
    for i in 0..100u32 {
        ring.publish(&frame(i, 6));
        assert!(cons.lag() <= ring.capacity(), "lag exceeded capacity");
    }
}

#[test]
fn test_close_drains_then_ends() {
    let ring = IqRing::new(64, 8).unwrap();
    let mut cons = ring.subscribe();
    ring.publish(&frame(0, 8));
    ring.close();

    assert!(!cons.at_end());
    let mut buf = vec![0.0; 8];
    assert_eq!(cons.read(&mut buf).n, 8);
    assert!(cons.at_end());
    assert_eq!(cons.read(&mut buf).n, 0);
}

#[test]
fn test_wait_returns_on_close() {
    let ring = IqRing::new(64, 8).unwrap();
    let cons = ring.subscribe();
    let closer = {
        let ring = ring.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ring.close();
        })
    };
    // Must return well before the 5 s timeout once close() lands.
    cons.wait(Duration::from_secs(5));
    assert!(ring.is_closed());
    closer.join().unwrap();
}

#[test]
fn test_concurrent_producer_and_consumers() {
    let ring = IqRing::new(1 << 12, 256).unwrap();
    const TOTAL: u64 = 200_000;

    let mut readers = Vec::new();
    for _ in 0..3 {
        let mut cons = ring.subscribe();
        readers.push(thread::spawn(move || {
            let mut buf = vec![0.0f32; 512];
            let mut got: u64 = 0;
            let mut slips: u64 = 0;
            loop {
                let r = cons.read(&mut buf);
                got += r.n as u64;
                slips += r.slipped;
                if r.n == 0 {
                    if cons.at_end() {
                        break;
                    }
                    cons.wait(Duration::from_millis(10));
                }
            }
            (got, slips)
        }));
    }

    let producer = {
        let ring = ring.clone();
        thread::spawn(move || {
            let mut sent: u64 = 0;
            let chunk = frame(0, 100);
            while sent < TOTAL {
                ring.publish(&chunk);
                sent += chunk.len() as u64;
            }
            ring.close();
        })
    };

    producer.join().unwrap();
    assert_eq!(ring.committed(), TOTAL);
    for reader in readers {
        let (got, slips) = reader.join().unwrap();
        if slips == 0 {
            // A consumer that never slipped received every element.
            assert_eq!(got, TOTAL);
        } else {
            assert!(got <= TOTAL);
        }
    }
}
