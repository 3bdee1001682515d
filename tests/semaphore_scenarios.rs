//! Integration coverage for the concrete scenarios this crate's semaphore
//! is expected to satisfy end to end, exercising [`Semaphore`] and
//! [`Barrier`] the way an application holding them across threads would.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier as StdBarrier};
use std::thread;
use std::time::{Duration, Instant};

use concurrency_primitives::{Barrier, Cancel, ErrorKind, Semaphore};
use concurrency_primitives::capability::ExclusiveLock;
use concurrency_primitives::multilock;
use concurrency_primitives::spinlock::SpinLock;

/// Scenario 1: three readers hold the shared slot concurrently; a writer
/// attempting `lock` does not enter until all three have released, then
/// enters exactly once.
#[test]
fn reader_writer_rendezvous() {
    let sem = Arc::new(Semaphore::new());
    let writer_entered = Arc::new(AtomicUsize::new(0));
    let readers_released = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let sem = sem.clone();
            let released = readers_released.clone();
            thread::spawn(move || {
                sem.read_lock().unwrap();
                thread::sleep(Duration::from_millis(40));
                sem.read_unlock();
                released.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(10));

    let writer = {
        let sem = sem.clone();
        let entered = writer_entered.clone();
        let released = readers_released.clone();
        thread::spawn(move || {
            sem.lock().unwrap();
            assert_eq!(
                released.load(Ordering::SeqCst),
                3,
                "writer must not enter before every reader released"
            );
            entered.fetch_add(1, Ordering::SeqCst);
            sem.unlock();
        })
    };

    for r in readers {
        r.join().unwrap();
    }
    writer.join().unwrap();
    assert_eq!(writer_entered.load(Ordering::SeqCst), 1);
}

/// Scenario 2: with 5 readers already holding the shared slot, a writer
/// queues, then a 6th reader arrives. The 6th reader must not enter before
/// the writer does.
#[test]
fn writer_preference_over_later_readers() {
    let sem = Arc::new(Semaphore::new());
    let order = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

    for _ in 0..5 {
        assert!(sem.try_read_lock());
    }

    let release_gate = Arc::new(StdBarrier::new(2));

    let writer = {
        let sem = sem.clone();
        let order = order.clone();
        let gate = release_gate.clone();
        thread::spawn(move || {
            gate.wait();
            sem.lock().unwrap();
            order.lock().unwrap().push("writer");
            thread::sleep(Duration::from_millis(20));
            sem.unlock();
        })
    };

    release_gate.wait();
    thread::sleep(Duration::from_millis(20));

    // The 6th reader must observe writer preference and refuse to enter
    // while the writer above is queued.
    assert!(
        !sem.try_read_lock(),
        "a new reader must not cut in front of a waiting writer"
    );

    for _ in 0..5 {
        sem.read_unlock();
    }

    writer.join().unwrap();

    let sixth = {
        let sem = sem.clone();
        let order = order.clone();
        thread::spawn(move || {
            sem.read_lock().unwrap();
            order.lock().unwrap().push("sixth-reader");
            sem.read_unlock();
        })
    };
    sixth.join().unwrap();

    let recorded = order.lock().unwrap();
    assert_eq!(&**recorded, ["writer", "sixth-reader"]);
}

/// Scenario 3: locks `[A, B, C]`, A and B free, C held elsewhere.
/// `try_lock_all` must report `false`, release A and B (C was never
/// acquired), and leave none of the three held by the caller.
#[test]
fn multilock_rollback_on_contended_tail_lock() {
    let a = SpinLock::new();
    let b = SpinLock::new();
    let c = SpinLock::new();
    c.lock();

    let locks: Vec<Option<&dyn ExclusiveLock>> = vec![Some(&a), Some(&b), Some(&c)];
    let acquired = multilock::try_lock_all(&locks).unwrap();

    assert!(!acquired);
    assert!(!a.is_locked());
    assert!(!b.is_locked());
    assert!(c.is_locked(), "C remains held by its original owner");

    c.unlock();
}

/// Scenario 4: a reader holds the shared slot for ~50ms; `close` is called
/// concurrently. `close` must block for roughly that long before
/// returning, the reader's release must succeed, and any subsequent `lock`
/// must observe `Closed`.
#[test]
fn close_drains_an_active_reader() {
    let sem = Arc::new(Semaphore::new());
    sem.read_lock().unwrap();

    let sem_for_reader = sem.clone();
    let reader = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        sem_for_reader.read_unlock();
    });

    let start = Instant::now();
    sem.close().unwrap();
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(40),
        "close returned after only {elapsed:?}, before the reader released"
    );

    reader.join().unwrap();
    assert_eq!(sem.lock().unwrap_err().kind(), ErrorKind::Closed);
}

/// Scenario 5: a writer holds the Semaphore exclusively; a second caller's
/// `lock_with_cancel` fires after ~20ms. The caller observes `Cancelled`
/// at roughly that delay, and no phantom holder remains: the original
/// writer's subsequent `unlock`/re-`lock` cycle still behaves as if the
/// cancelled attempt never happened.
#[test]
fn cancel_mid_wait_leaves_no_phantom_holder() {
    let sem = Arc::new(Semaphore::new());
    sem.lock().unwrap();

    let cancel = Cancel::after(Duration::from_millis(20));
    let start = Instant::now();
    let result = sem.lock_with_cancel(&cancel);
    let elapsed = start.elapsed();

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    assert!(elapsed >= Duration::from_millis(15));

    // The original writer still holds the slot.
    assert!(!sem.try_lock());
    sem.unlock();

    // And the Semaphore is exactly as if the cancelled caller never
    // attempted anything: a fresh acquire/release cycle works cleanly.
    assert!(sem.try_lock());
    sem.unlock();
}

/// Scenario 6: a Barrier with 10 waiters on its current Token; `broadcast`
/// wakes all 10 within a bounded time, and a subsequent waiter on the new
/// generation blocks again.
#[test]
fn barrier_broadcast_wakes_every_waiter() {
    let barrier = Arc::new(Barrier::new());
    barrier.init().unwrap();

    let generation = barrier.token().unwrap();
    let waiters: Vec<_> = (0..10)
        .map(|_| {
            let token = generation.clone();
            thread::spawn(move || token.wait())
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    barrier.broadcast().unwrap();

    for w in waiters {
        w.join().unwrap();
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    let next_generation = barrier.token().unwrap();
    assert!(!next_generation.is_closed());

    let still_blocks = {
        let token = next_generation.clone();
        thread::spawn(move || token.wait())
    };
    thread::sleep(Duration::from_millis(30));
    assert!(!still_blocks.is_finished());
    barrier.broadcast().unwrap();
    still_blocks.join().unwrap();
}
