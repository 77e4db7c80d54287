//! Audio cue call sites.
//!
//! The original source decorates action handlers to play short
//! positive/negative sound effects; this appliance replaces the decorator
//! with an explicit call at each site that needs one. Actually rendering a
//! cue (picking a sound file, writing it to the shared output device) is
//! out of scope here — see the module's Non-goals — but every call site
//! that would trigger one is expressed through this interface so wiring a
//! real player in later doesn't mean hunting down call sites.

/// A cue the Queue Engine or Session fires in response to an action's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Positive,
    Negative,
    ControllerConnected,
    HeadphonesConnected,
    NoFiles,
}

/// Plays a cue. The default implementation just logs; a real appliance
/// build swaps in a sink that writes a short clip to the shared audio
/// output device.
pub trait CueSink: Send + Sync {
    fn play(&self, cue: Cue);
}

/// Logs each cue instead of playing it. Used until a real sink is wired up
/// and in every test that doesn't care about audio feedback.
pub struct LoggingCueSink;

impl CueSink for LoggingCueSink {
    fn play(&self, cue: Cue) {
        tracing::debug!(?cue, "audio cue");
    }
}

/// Convenience free function for call sites that only have a `&dyn CueSink`.
pub fn audio_cue(sink: &dyn CueSink, cue: Cue) {
    sink.play(cue);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<Cue>>);

    impl CueSink for RecordingSink {
        fn play(&self, cue: Cue) {
            self.0.lock().unwrap().push(cue);
        }
    }

    #[test]
    fn test_audio_cue_forwards_to_sink() {
        let sink = RecordingSink(Mutex::new(Vec::new()));
        audio_cue(&sink, Cue::Positive);
        audio_cue(&sink, Cue::Negative);
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[Cue::Positive, Cue::Negative]);
    }
}
