use biometrics::{Collector, Counter, Moments};

pub(crate) static CHANNELS_OPENED: Counter = Counter::new("askstream.stream.channels_opened");
pub(crate) static CHANNELS_SUPERSEDED: Counter =
    Counter::new("askstream.stream.channels_superseded");
pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("askstream.stream.fragments");
pub(crate) static STREAM_MALFORMED: Counter = Counter::new("askstream.stream.malformed_fragments");
pub(crate) static STREAM_TOKENS: Counter = Counter::new("askstream.stream.tokens");
pub(crate) static STREAM_FAULTS: Counter = Counter::new("askstream.stream.faults");
pub(crate) static STREAM_BYTES: Counter = Counter::new("askstream.stream.bytes");
pub(crate) static STREAM_TTFT: Moments = Moments::new("askstream.stream.time_to_first_token_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("askstream.stream.duration_seconds");

pub(crate) static ANSWERS_FINALIZED: Counter = Counter::new("askstream.conversation.answers");
pub(crate) static ANSWERS_DISCARDED: Counter =
    Counter::new("askstream.conversation.answers_discarded");
pub(crate) static ANSWERS_TRUNCATED: Counter =
    Counter::new("askstream.conversation.answers_truncated");

pub(crate) static HISTORY_SAVES: Counter = Counter::new("askstream.history.saves");
pub(crate) static HISTORY_SAVE_ERRORS: Counter = Counter::new("askstream.history.save_errors");
pub(crate) static HISTORY_LOAD_ERRORS: Counter = Counter::new("askstream.history.load_errors");

pub(crate) static UPLOADS: Counter = Counter::new("askstream.client.uploads");
pub(crate) static UPLOAD_ERRORS: Counter = Counter::new("askstream.client.upload_errors");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CHANNELS_OPENED);
    collector.register_counter(&CHANNELS_SUPERSEDED);
    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_MALFORMED);
    collector.register_counter(&STREAM_TOKENS);
    collector.register_counter(&STREAM_FAULTS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFT);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&ANSWERS_FINALIZED);
    collector.register_counter(&ANSWERS_DISCARDED);
    collector.register_counter(&ANSWERS_TRUNCATED);

    collector.register_counter(&HISTORY_SAVES);
    collector.register_counter(&HISTORY_SAVE_ERRORS);
    collector.register_counter(&HISTORY_LOAD_ERRORS);

    collector.register_counter(&UPLOADS);
    collector.register_counter(&UPLOAD_ERRORS);
}
