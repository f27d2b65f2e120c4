//! Steady-state identity streaming: a ramp goes in, the same ramp comes
//! out, with no silence and no duplicated or fabricated samples.

mod helpers;

use helpers::*;
use segue::prelude::*;
use std::sync::Mutex;

// One context per process: serialize the tests in this binary.
static LOCK: Mutex<()> = Mutex::new(());

fn identity_stream() -> SegueStream {
    let mut stream = SegueStream::builder()
        .context_config(semaphore_context(2))
        .inference_config(mono_config(TEST_BLOCK_SIZE, TEST_BLOCK_SIZE))
        .build()
        .expect("failed to build stream");
    stream
        .prepare_to_play(TEST_SAMPLE_RATE, TEST_BLOCK_SIZE)
        .expect("prepare failed");
    stream
}

#[test]
fn ramp_survives_the_scheduler_unchanged() {
    let _guard = LOCK.lock().unwrap();
    let mut stream = identity_stream();

    let num_blocks = 750; // one second at 48 kHz / 64
    let ramp = generate_ramp(num_blocks * TEST_BLOCK_SIZE);
    let mut emitted = Vec::with_capacity(ramp.len());

    for block in ramp.chunks(TEST_BLOCK_SIZE) {
        submit_block(&mut stream, block);
        emitted.extend(request_block(&mut stream, TEST_BLOCK_SIZE));
    }

    assert_eq!(emitted.len(), ramp.len());
    assert_eq!(emitted, ramp, "identity stream must not alter samples");
}

#[test]
fn prepare_is_idempotent() {
    let _guard = LOCK.lock().unwrap();
    let mut stream = identity_stream();
    // A second prepare with the same host config drains and rebuilds; the
    // steady-state behavior must be identical.
    stream
        .prepare_to_play(TEST_SAMPLE_RATE, TEST_BLOCK_SIZE)
        .expect("re-prepare failed");

    let ramp = generate_ramp(10 * TEST_BLOCK_SIZE);
    let mut emitted = Vec::new();
    for block in ramp.chunks(TEST_BLOCK_SIZE) {
        submit_block(&mut stream, block);
        emitted.extend(request_block(&mut stream, TEST_BLOCK_SIZE));
    }
    assert_eq!(emitted, ramp);
}

#[test]
fn default_latency_is_a_tenth_of_a_second() {
    let _guard = LOCK.lock().unwrap();
    let stream = identity_stream();
    assert_eq!(stream.latency_samples(), 4800);
}
