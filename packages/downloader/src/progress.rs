use std::{sync::Arc, time::Instant};

/// Byte-level progress of the track currently downloading.
///
/// Only emitted when tracks are processed sequentially.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Declared total size of the download
    Size { track_id: u64, bytes: u64 },
    /// Current download speed
    Speed {
        track_id: u64,
        /// Download speed in bytes per second
        bytes_per_second: f64,
    },
    BytesRead {
        track_id: u64,
        /// Bytes read so far
        read: u64,
        /// Total bytes to read
        total: u64,
    },
}

pub type ProgressListener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Fans chunk notifications out to listeners for one track.
pub(crate) struct ProgressReporter<'a> {
    track_id: u64,
    total: u64,
    listeners: &'a [ProgressListener],
    last_instant: Instant,
    bytes_since_last_interval: u64,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(track_id: u64, total: u64, listeners: &'a [ProgressListener]) -> Self {
        let reporter = Self {
            track_id,
            total,
            listeners,
            last_instant: Instant::now(),
            bytes_since_last_interval: 0,
        };

        reporter.emit(&ProgressEvent::Size {
            track_id,
            bytes: total,
        });

        reporter
    }

    fn emit(&self, event: &ProgressEvent) {
        for listener in self.listeners {
            listener(event);
        }
    }

    pub fn on_chunk(&mut self, len: usize, read: u64) {
        if self.listeners.is_empty() {
            return;
        }

        self.emit(&ProgressEvent::BytesRead {
            track_id: self.track_id,
            read,
            total: self.total,
        });

        self.bytes_since_last_interval += len as u64;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_instant);

        if elapsed.as_millis() >= 1000 {
            #[allow(clippy::cast_precision_loss)]
            let bytes_per_second = self.bytes_since_last_interval as f64 / elapsed.as_secs_f64();

            log::debug!(
                "Speed: {bytes_per_second} b/s {} KiB/s {} MiB/s",
                bytes_per_second / 1024.0,
                bytes_per_second / 1024.0 / 1024.0,
            );

            self.emit(&ProgressEvent::Speed {
                track_id: self.track_id,
                bytes_per_second,
            });

            self.last_instant = now;
            self.bytes_since_last_interval = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn reports_size_then_bytes_read() {
        let events = Arc::new(Mutex::new(vec![]));
        let listener: ProgressListener = {
            let events = events.clone();
            Arc::new(move |event: &ProgressEvent| events.lock().unwrap().push(event.clone()))
        };
        let listeners = vec![listener];

        let mut reporter = ProgressReporter::new(4, 10, &listeners);
        reporter.on_chunk(6, 6);
        reporter.on_chunk(4, 10);

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ProgressEvent::Size {
                    track_id: 4,
                    bytes: 10
                },
                ProgressEvent::BytesRead {
                    track_id: 4,
                    read: 6,
                    total: 10
                },
                ProgressEvent::BytesRead {
                    track_id: 4,
                    read: 10,
                    total: 10
                },
            ]
        );
    }
}
