use netweave_core::AnalyticsSink;
use netweave_domain::{EventMetadata, NetworkEvent};

/// Analytics sink that writes every event to the `netweave::analytics`
/// tracing target. Failures and opened circuits log at `warn`, everything
/// else at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn track_event(&self, event: NetworkEvent, metadata: EventMetadata) {
        let fields = render(&metadata);
        match event {
            NetworkEvent::RequestFailed | NetworkEvent::CircuitOpened => {
                tracing::warn!(target: "netweave::analytics", event = %event, %fields)
            }
            _ => tracing::debug!(target: "netweave::analytics", event = %event, %fields),
        }
    }
}

/// `key=value` pairs in key order
fn render(metadata: &EventMetadata) -> String {
    metadata.iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_events_are_logged_with_metadata() {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            TracingAnalytics.track_event(
                NetworkEvent::RequestFailed,
                EventMetadata::new().with("endpoint", "/users").with("attempts", 3),
            );
            TracingAnalytics.track_event(NetworkEvent::CacheHit, EventMetadata::new());
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("WARN"));
        assert!(lines[0].contains("request_failed"));
        assert!(lines[0].contains("attempts=3 endpoint=/users"));
        assert!(lines[1].contains("cache_hit"));
    }
}
