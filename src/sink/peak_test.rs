use super::*;
use crate::ring::IqRing;

fn recv_line(rx: &mut broadcast::Receiver<String>, deadline: Duration) -> Option<String> {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        match rx.try_recv() {
            Ok(line) => return Some(line),
            Err(broadcast::error::TryRecvError::Empty) => {
                thread::sleep(Duration::from_millis(10))
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(broadcast::error::TryRecvError::Closed) => return None,
        }
    }
    None
}

#[test]
fn test_peak_line_reports_dbfs() {
    let ring = IqRing::new(1 << 14, 256).unwrap();
    let cons = ring.subscribe();
    let stats = Arc::new(CaptureStats::default());
    let (tx, mut rx) = broadcast::channel(16);
    let sink = spawn(cons, Arc::clone(&stats), tx, Duration::from_millis(50));

    // Keep data flowing so the meter loop keeps ticking; peak |Q| = 0.5.
    let frame: Vec<f32> = vec![0.1, -0.5, 0.2, 0.3];
    let line = loop {
        ring.publish(&frame);
        if let Some(line) = recv_line(&mut rx, Duration::from_millis(20)) {
            break line;
        }
    };
    // 20*log10(0.5) = -6.02
    assert_eq!(line, "-6.0 dBFS");

    ring.close();
    sink.join().unwrap();
}

#[test]
fn test_overflow_auxiliary_line() {
    let ring = IqRing::new(1 << 14, 256).unwrap();
    let cons = ring.subscribe();
    let stats = Arc::new(CaptureStats::default());
    stats.overflow_total.store(3, Ordering::Release);
    let (tx, mut rx) = broadcast::channel(16);
    let sink = spawn(cons, Arc::clone(&stats), tx, Duration::from_millis(50));

    let frame = vec![0.25f32, 0.25];
    let mut saw_overflow = false;
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline && !saw_overflow {
        ring.publish(&frame);
        if let Some(line) = recv_line(&mut rx, Duration::from_millis(20)) {
            if line == "overflows 3" {
                saw_overflow = true;
            }
        }
    }
    assert!(saw_overflow, "overflow delta must surface on the feed");

    ring.close();
    sink.join().unwrap();
}

#[test]
fn test_silence_reports_floor() {
    let ring = IqRing::new(1 << 14, 256).unwrap();
    let cons = ring.subscribe();
    let stats = Arc::new(CaptureStats::default());
    let (tx, mut rx) = broadcast::channel(16);
    let sink = spawn(cons, Arc::clone(&stats), tx, Duration::from_millis(50));

    let frame = vec![0.0f32; 8];
    let line = loop {
        ring.publish(&frame);
        if let Some(line) = recv_line(&mut rx, Duration::from_millis(20)) {
            break line;
        }
    };
    assert_eq!(line, "-200.0 dBFS");

    ring.close();
    sink.join().unwrap();
}
