use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Identical consecutive tool calls that count as a loop.
pub const TOOL_CALL_LOOP_THRESHOLD: usize = 5;
/// Identical consecutive sentences that count as chanting.
pub const CONTENT_LOOP_THRESHOLD: usize = 10;

static SENTENCE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^.!?]+[.!?]").unwrap());

/// One observation from the model's streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    ToolCall { name: String, args: Value },
    Content(String),
    /// Anything else (thoughts, finish markers); breaks every streak.
    Other,
}

/// Detects degenerate generation: the same tool call or the same sentence
/// repeated back to back.
///
/// Counters only track consecutive repeats. Seeing one kind of event resets
/// tracking of the other kind. Once tripped, the guard stays tripped until
/// [`LoopGuard::reset`].
#[derive(Debug, Default)]
pub struct LoopGuard {
    last_tool_call: Option<blake3::Hash>,
    tool_call_repeats: usize,
    last_sentence: Option<String>,
    sentence_repeats: usize,
    pending: String,
    loop_detected: bool,
}

impl LoopGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `event`; returns `true` when a loop is detected.
    pub fn add_and_check(&mut self, event: &GenerationEvent) -> bool {
        if self.loop_detected {
            return true;
        }
        let tripped = match event {
            GenerationEvent::ToolCall { name, args } => self.check_tool_call(name, args),
            GenerationEvent::Content(text) => self.check_content(text),
            GenerationEvent::Other => {
                self.reset_tool_call_tracking();
                self.reset_content_tracking();
                false
            }
        };
        if tripped {
            self.loop_detected = true;
        }
        tripped
    }

    #[must_use]
    pub fn loop_detected(&self) -> bool {
        self.loop_detected
    }

    /// Forget everything; called when a new user prompt starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn check_tool_call(&mut self, name: &str, args: &Value) -> bool {
        self.reset_content_tracking();
        let fingerprint = tool_call_fingerprint(name, args);
        if self.last_tool_call == Some(fingerprint) {
            self.tool_call_repeats += 1;
        } else {
            self.last_tool_call = Some(fingerprint);
            self.tool_call_repeats = 1;
        }
        if self.tool_call_repeats >= TOOL_CALL_LOOP_THRESHOLD {
            tracing::warn!(
                tool = name,
                repeats = self.tool_call_repeats,
                "repeated identical tool call detected"
            );
            return true;
        }
        false
    }

    fn check_content(&mut self, text: &str) -> bool {
        self.reset_tool_call_tracking();
        self.pending.push_str(text);

        let mut consumed = 0;
        let mut tripped = false;
        let sentences: Vec<(usize, String)> = SENTENCE_RE
            .find_iter(&self.pending)
            .map(|m| (m.end(), m.as_str().trim().to_owned()))
            .collect();

        for (end, sentence) in sentences {
            consumed = end;
            if sentence.is_empty() {
                continue;
            }
            if self.last_sentence.as_deref() == Some(sentence.as_str()) {
                self.sentence_repeats += 1;
            } else {
                self.last_sentence = Some(sentence);
                self.sentence_repeats = 1;
            }
            if self.sentence_repeats >= CONTENT_LOOP_THRESHOLD {
                tracing::warn!(
                    repeats = self.sentence_repeats,
                    "repeated sentence detected in model output"
                );
                tripped = true;
                break;
            }
        }
        self.pending.replace_range(..consumed, "");
        tripped
    }

    fn reset_tool_call_tracking(&mut self) {
        self.last_tool_call = None;
        self.tool_call_repeats = 0;
    }

    fn reset_content_tracking(&mut self) {
        self.last_sentence = None;
        self.sentence_repeats = 0;
        self.pending.clear();
    }
}

/// Hash of the tool name and its arguments in canonical (key-sorted) JSON,
/// so argument order does not matter.
fn tool_call_fingerprint(name: &str, args: &Value) -> blake3::Hash {
    let mut canonical = String::new();
    write_canonical(args, &mut canonical);
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&[0]);
    hasher.update(canonical.as_bytes());
    hasher.finalize()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}
