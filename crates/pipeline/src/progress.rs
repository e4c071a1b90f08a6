//! Progress reporting for long-running sessions.
//!
//! A session owner may attach a bounded crossbeam channel and receive
//! [`Progress`] snapshots while the drain loop runs. Sending never blocks:
//! when the receiver lags, intermediate snapshots are dropped and only the
//! cadence suffers, not the transcode.

use crossbeam_channel::Sender;
use ob_common::MediaTime;

/// High-level phase of a pipeline session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Opening the source and configuring codecs.
    Preparing,
    /// The drain loop is moving samples end to end.
    Transcoding,
    /// Finalizing the output container.
    Finalizing,
    /// The session finished and the output file is complete.
    Complete,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Preparing => "Preparing",
            Phase::Transcoding => "Transcoding",
            Phase::Finalizing => "Finalizing",
            Phase::Complete => "Complete",
        }
    }
}

/// Snapshot of a running session's position in the source timeline.
#[derive(Clone, Debug)]
pub struct Progress {
    pub phase: Phase,
    /// Frames composited and handed to the encoder so far.
    pub frames_rendered: u64,
    /// Encoded samples written to the output container so far.
    pub samples_written: u64,
    /// Presentation time of the most recently rendered frame.
    pub position: MediaTime,
    /// Total source duration, zero when unknown.
    pub duration: MediaTime,
}

impl Progress {
    /// Position as a fraction of the source duration in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.duration.as_micros() <= 0 {
            return 0.0;
        }
        (self.position.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0)
    }
}

/// Fire-and-forget send used by the drain loop.
pub(crate) fn send_progress(tx: Option<&Sender<Progress>>, progress: Progress) {
    if let Some(tx) = tx {
        let _ = tx.try_send(progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(position_us: i64, duration_us: i64) -> Progress {
        Progress {
            phase: Phase::Transcoding,
            frames_rendered: 0,
            samples_written: 0,
            position: MediaTime::from_micros(position_us),
            duration: MediaTime::from_micros(duration_us),
        }
    }

    #[test]
    fn fraction_is_position_over_duration() {
        assert_eq!(snapshot(500_000, 1_000_000).fraction(), 0.5);
    }

    #[test]
    fn fraction_handles_unknown_duration() {
        assert_eq!(snapshot(500_000, 0).fraction(), 0.0);
    }

    #[test]
    fn fraction_clamps_past_the_end() {
        assert_eq!(snapshot(2_000_000, 1_000_000).fraction(), 1.0);
    }

    #[test]
    fn send_is_lossy_when_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        send_progress(Some(&tx), snapshot(1, 2));
        send_progress(Some(&tx), snapshot(3, 4));
        assert_eq!(rx.try_recv().unwrap().position.as_micros(), 1);
        assert!(rx.try_recv().is_err());
    }
}
