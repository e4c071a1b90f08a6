//! Non-blocking codec buffer queue.
//!
//! `CodecQueue` is the front-end both codecs share: a client thread feeds
//! compressed input through a small pool of input slots and polls for output
//! events, while a worker thread behind the queue does the actual work. All
//! client calls are non-blocking with a caller-chosen timeout; a timeout is
//! the normal "nothing ready yet" signal, not an error.
//!
//! The queue enforces the buffer protocol: an input slot must be dequeued
//! before it is queued, and an output buffer must be released exactly once.
//! Violations are programmer errors and surface as
//! `CodecError::ProtocolViolation`. A worker failure poisons the queue and
//! every subsequent client call returns `CodecError::Failed`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ob_common::{BufferInfo, CodecError, CodecResult, Sample, TrackFormat};

/// Number of input slots a codec exposes at once.
pub const INPUT_SLOT_COUNT: usize = 4;

/// One output buffer handed to the client. The `id` must be passed back via
/// `release_output` exactly once.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    pub id: usize,
    pub data: Vec<u8>,
    pub info: BufferInfo,
}

/// Result of polling a codec's output side.
#[derive(Debug, Clone)]
pub enum OutputPoll {
    /// Nothing became available within the timeout.
    TryAgain,
    /// The codec's actual output format is now known. Emitted at most once,
    /// before any output buffer.
    FormatChanged(TrackFormat),
    /// One output buffer, in emission order.
    Buffer(OutputBuffer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Handed to the client by `dequeue_input`, not yet queued back.
    Dequeued,
}

#[derive(Debug)]
enum OutputEvent {
    FormatChanged(TrackFormat),
    Buffer(OutputBuffer),
}

#[derive(Debug)]
struct QueueState {
    slots: Vec<SlotState>,
    /// Samples queued by the client, waiting for the worker.
    pending_work: VecDeque<Sample>,
    /// Slot index travels with each pending sample so the slot can be freed
    /// when the worker takes it.
    pending_slots: VecDeque<usize>,
    output: VecDeque<OutputEvent>,
    /// Output buffer ids handed out and not yet released.
    outstanding: Vec<usize>,
    next_output_id: usize,
    /// End-of-stream has been queued; no further input is legal.
    input_ended: bool,
    /// Client or owner requested shutdown.
    closed: bool,
    /// Worker finished cleanly.
    finished: bool,
    /// Worker failure message; poisons all client calls.
    failure: Option<String>,
}

#[derive(Debug)]
struct QueueShared {
    state: Mutex<QueueState>,
    /// Wakes clients waiting for a free input slot.
    slot_available: Condvar,
    /// Wakes the worker waiting for queued input.
    work_available: Condvar,
    /// Wakes clients waiting for output.
    output_available: Condvar,
}

/// Shared handle to one codec's buffer queue. Clones refer to the same
/// queue; typically one clone lives on the client side and one inside the
/// worker thread.
#[derive(Debug, Clone)]
pub struct CodecQueue {
    shared: Arc<QueueShared>,
}

impl CodecQueue {
    pub fn new(input_slots: usize) -> Self {
        CodecQueue {
            shared: Arc::new(QueueShared {
                state: Mutex::new(QueueState {
                    slots: vec![SlotState::Free; input_slots],
                    pending_work: VecDeque::new(),
                    pending_slots: VecDeque::new(),
                    output: VecDeque::new(),
                    outstanding: Vec::new(),
                    next_output_id: 0,
                    input_ended: false,
                    closed: false,
                    finished: false,
                    failure: None,
                }),
                slot_available: Condvar::new(),
                work_available: Condvar::new(),
                output_available: Condvar::new(),
            }),
        }
    }

    // ── Client side ──────────────────────────────────────────────────────

    /// Wait up to `timeout` for a free input slot. `Ok(None)` means no slot
    /// freed up in time; try again later.
    pub fn dequeue_input(&self, timeout: Duration) -> CodecResult<Option<usize>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            check_failure(&state)?;
            if let Some(index) = state.slots.iter().position(|s| *s == SlotState::Free) {
                state.slots[index] = SlotState::Dequeued;
                return Ok(Some(index));
            }
            if self
                .shared
                .slot_available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                check_failure(&state)?;
                return Ok(None);
            }
        }
    }

    /// Queue a previously dequeued slot with payload and timing for the
    /// worker. An `END_OF_STREAM` flag marks the input side done; queueing
    /// anything after that is a protocol violation.
    pub fn queue_input(&self, slot: usize, data: Vec<u8>, info: BufferInfo) -> CodecResult<()> {
        let mut state = self.shared.state.lock();
        check_failure(&state)?;

        if state.input_ended {
            return Err(CodecError::ProtocolViolation(
                "Input was queued after end-of-stream".into(),
            ));
        }
        match state.slots.get(slot) {
            Some(SlotState::Dequeued) => {}
            Some(SlotState::Free) => {
                return Err(CodecError::ProtocolViolation(format!(
                    "Input slot {} was queued without being dequeued",
                    slot
                )));
            }
            None => {
                return Err(CodecError::ProtocolViolation(format!(
                    "Input slot {} does not exist",
                    slot
                )));
            }
        }

        if info.is_end_of_stream() {
            state.input_ended = true;
        }
        state.pending_work.push_back(Sample::new(data, info));
        state.pending_slots.push_back(slot);
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Poll the output side. Returns `TryAgain` after `timeout` if no event
    /// arrived. Buffer events must be released via [`release_output`].
    ///
    /// [`release_output`]: CodecQueue::release_output
    pub fn dequeue_output(&self, timeout: Duration) -> CodecResult<OutputPoll> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            check_failure(&state)?;
            if let Some(event) = state.output.pop_front() {
                return Ok(match event {
                    OutputEvent::FormatChanged(format) => OutputPoll::FormatChanged(format),
                    OutputEvent::Buffer(buffer) => {
                        state.outstanding.push(buffer.id);
                        OutputPoll::Buffer(buffer)
                    }
                });
            }
            if self
                .shared
                .output_available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                check_failure(&state)?;
                return Ok(OutputPoll::TryAgain);
            }
        }
    }

    /// Return an output buffer to the codec. Each dequeued buffer must be
    /// released exactly once.
    pub fn release_output(&self, id: usize) -> CodecResult<()> {
        let mut state = self.shared.state.lock();
        check_failure(&state)?;
        match state.outstanding.iter().position(|&o| o == id) {
            Some(index) => {
                state.outstanding.swap_remove(index);
                Ok(())
            }
            None => Err(CodecError::ProtocolViolation(format!(
                "Output buffer {} was not dequeued or was already released",
                id
            ))),
        }
    }

    /// Request shutdown: wakes the worker (which sees `None` from
    /// `take_work`) and any blocked clients.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.work_available.notify_all();
        self.shared.slot_available.notify_all();
        self.shared.output_available.notify_all();
    }

    // ── Worker side ──────────────────────────────────────────────────────

    /// Block until input is queued or the queue is closed. Returning a
    /// sample frees its input slot.
    pub fn take_work(&self) -> Option<Sample> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(sample) = state.pending_work.pop_front() {
                if let Some(slot) = state.pending_slots.pop_front() {
                    state.slots[slot] = SlotState::Free;
                    self.shared.slot_available.notify_one();
                }
                return Some(sample);
            }
            if state.closed {
                return None;
            }
            self.shared.work_available.wait(&mut state);
        }
    }

    /// Announce the codec's real output format. Must precede any buffer.
    pub fn push_format_change(&self, format: TrackFormat) {
        let mut state = self.shared.state.lock();
        state.output.push_back(OutputEvent::FormatChanged(format));
        self.shared.output_available.notify_one();
    }

    /// Publish one output buffer and return its id.
    pub fn push_output(&self, data: Vec<u8>, info: BufferInfo) -> usize {
        let mut state = self.shared.state.lock();
        let id = state.next_output_id;
        state.next_output_id += 1;
        state.output.push_back(OutputEvent::Buffer(OutputBuffer { id, data, info }));
        self.shared.output_available.notify_one();
        id
    }

    /// Poison the queue. Every subsequent client call fails with
    /// `CodecError::Failed` carrying this message.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%message, "codec worker failed");
        let mut state = self.shared.state.lock();
        if state.failure.is_none() {
            state.failure = Some(message);
        }
        self.shared.slot_available.notify_all();
        self.shared.work_available.notify_all();
        self.shared.output_available.notify_all();
    }

    /// Mark the worker as cleanly finished.
    pub fn mark_finished(&self) {
        let mut state = self.shared.state.lock();
        state.finished = true;
        self.shared.output_available.notify_all();
    }

    /// Whether the worker has exited cleanly.
    pub fn is_finished(&self) -> bool {
        self.shared.state.lock().finished
    }
}

fn check_failure(state: &QueueState) -> CodecResult<()> {
    match &state.failure {
        Some(message) => Err(CodecError::Failed(message.clone())),
        None => Ok(()),
    }
}
