//! Threshold state machine driving the control channel.
//!
//! Each tick the designated source's value is classified against a cutoff.
//! Commands go out only when the classification moves to a different known
//! state; an unknown reading (no value this window, or not a number) leaves
//! the last emitted state untouched, so a flapping source cannot cause a
//! command storm.

use std::fmt;

use super::protocol::{ControlMessage, ObjectId, PropertyId};

/// Classification of a reading against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdState {
    /// No value, or not a number.
    Unknown,
    /// `value < threshold`.
    Below,
    /// `value >= threshold`.
    AtOrAbove,
}

impl ThresholdState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Below => "below",
            Self::AtOrAbove => "at_or_above",
        }
    }
}

impl fmt::Display for ThresholdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a raw reading by its leading number, so `"3.5V"` reads as 3.5.
/// No leading number, or NaN, is Unknown.
#[must_use]
pub fn classify(value: Option<&str>, threshold: f64) -> ThresholdState {
    match value.and_then(leading_f64) {
        None => ThresholdState::Unknown,
        Some(v) if v.is_nan() => ThresholdState::Unknown,
        Some(v) if v >= threshold => ThresholdState::AtOrAbove,
        Some(_) => ThresholdState::Below,
    }
}

/// Parses the longest decimal float at the start of `text`.
///
/// Leading whitespace is skipped. Accepts an optional sign, digits with an
/// optional fraction, and an exponent only when digits follow the `e`.
/// `inf`, `infinity` and `nan` match case-insensitively. Hex floats are not
/// recognised: `"0x1A"` reads as 0.
fn leading_f64(text: &str) -> Option<f64> {
    let s = text.trim_start();
    let b = s.as_bytes();
    let digits_from = |at: usize| {
        b.get(at..)
            .map_or(0, |tail| tail.iter().take_while(|c| c.is_ascii_digit()).count())
    };

    let sign = usize::from(matches!(b.first(), Some(b'+' | b'-')));
    let negative = b.first() == Some(&b'-');

    let word_at = |word: &str| {
        b.get(sign..sign + word.len())
            .is_some_and(|w| w.eq_ignore_ascii_case(word.as_bytes()))
    };
    if word_at("nan") {
        return Some(f64::NAN);
    }
    if word_at("inf") {
        return Some(if negative { f64::NEG_INFINITY } else { f64::INFINITY });
    }

    let int = digits_from(sign);
    let mut end = sign + int;
    if b.get(end) == Some(&b'.') {
        let frac = digits_from(end + 1);
        if int + frac == 0 {
            return None;
        }
        end += 1 + frac;
    } else if int == 0 {
        return None;
    }

    if matches!(b.get(end), Some(b'e' | b'E')) {
        let exp_sign = usize::from(matches!(b.get(end + 1), Some(b'+' | b'-')));
        let exp = digits_from(end + 1 + exp_sign);
        if exp > 0 {
            end += 1 + exp_sign + exp;
        }
    }
    s[..end].parse().ok()
}

/// Frequency/amplitude pair written to the controlled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSetting {
    pub frequency: u16,
    pub amplitude: u16,
}

impl OutputSetting {
    /// Applied while the reading is at or above the threshold.
    pub const AT_OR_ABOVE: Self = Self {
        frequency: 1000,
        amplitude: 8000,
    };

    /// Applied while the reading is below the threshold.
    pub const BELOW: Self = Self {
        frequency: 2000,
        amplitude: 4000,
    };
}

/// A state change and the commands it requires, in send order.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: ThresholdState,
    pub to: ThresholdState,
    pub commands: Vec<ControlMessage>,
}

/// Edge-triggered threshold controller.
#[derive(Debug, Clone)]
pub struct ThresholdController {
    threshold: f64,
    object: ObjectId,
    at_or_above: OutputSetting,
    below: OutputSetting,
    verify: bool,
    last_emitted: ThresholdState,
}

impl ThresholdController {
    /// Creates a controller that has not emitted anything yet.
    #[must_use]
    pub const fn new(
        threshold: f64,
        object: ObjectId,
        at_or_above: OutputSetting,
        below: OutputSetting,
        verify: bool,
    ) -> Self {
        Self {
            threshold,
            object,
            at_or_above,
            below,
            verify,
            last_emitted: ThresholdState::Unknown,
        }
    }

    /// State whose commands were sent most recently.
    #[must_use]
    pub const fn last_emitted(&self) -> ThresholdState {
        self.last_emitted
    }

    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Evaluates one tick's reading.
    ///
    /// Returns the transition to act on, or `None` when nothing must be sent.
    pub fn evaluate(&mut self, value: Option<&str>) -> Option<Transition> {
        let next = classify(value, self.threshold);
        if next == ThresholdState::Unknown || next == self.last_emitted {
            return None;
        }
        let from = self.last_emitted;
        self.last_emitted = next;
        Some(Transition {
            from,
            to: next,
            commands: self.commands_for(next),
        })
    }

    fn commands_for(&self, state: ThresholdState) -> Vec<ControlMessage> {
        let setting = match state {
            ThresholdState::AtOrAbove => self.at_or_above,
            ThresholdState::Below => self.below,
            ThresholdState::Unknown => return Vec::new(),
        };
        let mut commands = vec![
            ControlMessage::Write {
                object: self.object,
                property: PropertyId::FREQUENCY,
                value: setting.frequency,
            },
            ControlMessage::Write {
                object: self.object,
                property: PropertyId::AMPLITUDE,
                value: setting.amplitude,
            },
        ];
        if self.verify {
            commands.push(ControlMessage::Read {
                object: self.object,
                property: PropertyId::FREQUENCY,
            });
            commands.push(ControlMessage::Read {
                object: self.object,
                property: PropertyId::AMPLITUDE,
            });
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(verify: bool) -> ThresholdController {
        ThresholdController::new(
            3.0,
            ObjectId::OUTPUT_1,
            OutputSetting::AT_OR_ABOVE,
            OutputSetting::BELOW,
            verify,
        )
    }

    fn write_values(t: &Transition) -> Vec<(PropertyId, u16)> {
        t.commands
            .iter()
            .filter_map(|c| match *c {
                ControlMessage::Write {
                    property, value, ..
                } => Some((property, value)),
                ControlMessage::Read { .. } => None,
            })
            .collect()
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(Some("2.999"), 3.0), ThresholdState::Below);
        assert_eq!(classify(Some("3.0"), 3.0), ThresholdState::AtOrAbove);
        assert_eq!(classify(Some("3"), 3.0), ThresholdState::AtOrAbove);
        assert_eq!(classify(Some("-12"), 3.0), ThresholdState::Below);
        assert_eq!(classify(Some("1e3"), 3.0), ThresholdState::AtOrAbove);
    }

    #[test]
    fn classify_unknown_inputs() {
        assert_eq!(classify(None, 3.0), ThresholdState::Unknown);
        assert_eq!(classify(Some("NaN"), 3.0), ThresholdState::Unknown);
        assert_eq!(classify(Some("--"), 3.0), ThresholdState::Unknown);
        assert_eq!(classify(Some("abc"), 3.0), ThresholdState::Unknown);
        assert_eq!(classify(Some("nan mV"), 3.0), ThresholdState::Unknown);
        assert_eq!(classify(Some("."), 3.0), ThresholdState::Unknown);
        assert_eq!(classify(Some("-V"), 3.0), ThresholdState::Unknown);
    }

    #[test]
    fn classify_reads_leading_number() {
        assert_eq!(classify(Some("3.5V"), 3.0), ThresholdState::AtOrAbove);
        assert_eq!(classify(Some("4.0 volts"), 3.0), ThresholdState::AtOrAbove);
        assert_eq!(classify(Some("2.5e"), 3.0), ThresholdState::Below);
        assert_eq!(classify(Some("2.5e+"), 3.0), ThresholdState::Below);
        assert_eq!(classify(Some("3e0x"), 3.0), ThresholdState::AtOrAbove);
        assert_eq!(classify(Some("0x1A"), 3.0), ThresholdState::Below);
        assert_eq!(classify(Some("Infinity!"), 3.0), ThresholdState::AtOrAbove);
        assert_eq!(classify(Some("-inf"), 3.0), ThresholdState::Below);
    }

    #[test]
    fn leading_number_extent() {
        assert_eq!(leading_f64("  -1.25abc"), Some(-1.25));
        assert_eq!(leading_f64("5."), Some(5.0));
        assert_eq!(leading_f64(".5."), Some(0.5));
        assert_eq!(leading_f64("+7e2V"), Some(700.0));
        assert_eq!(leading_f64("1e-1e"), Some(0.1));
        assert_eq!(leading_f64(""), None);
        assert_eq!(leading_f64("+"), None);
        assert_eq!(leading_f64("e5"), None);
        assert!(leading_f64("NaN").is_some_and(f64::is_nan));
    }

    #[test]
    fn fires_only_on_state_changes() {
        let mut ctl = controller(false);
        let readings = ["NaN", "2.9", "3.0", "3.1", "2.5"];
        let fired: Vec<Option<ThresholdState>> = readings
            .iter()
            .map(|r| ctl.evaluate(Some(*r)).map(|t| t.to))
            .collect();

        assert_eq!(
            fired,
            [
                None,
                Some(ThresholdState::Below),
                Some(ThresholdState::AtOrAbove),
                None,
                Some(ThresholdState::Below),
            ]
        );
    }

    #[test]
    fn transition_carries_setting_pair() {
        let mut ctl = controller(false);

        let up = ctl.evaluate(Some("4.5")).unwrap();
        assert_eq!(up.from, ThresholdState::Unknown);
        assert_eq!(
            write_values(&up),
            [(PropertyId::FREQUENCY, 1000), (PropertyId::AMPLITUDE, 8000)]
        );

        let down = ctl.evaluate(Some("0.5")).unwrap();
        assert_eq!(down.from, ThresholdState::AtOrAbove);
        assert_eq!(
            write_values(&down),
            [(PropertyId::FREQUENCY, 2000), (PropertyId::AMPLITUDE, 4000)]
        );
    }

    #[test]
    fn unknown_freezes_last_state() {
        let mut ctl = controller(false);
        assert!(ctl.evaluate(Some("5")).is_some());

        assert!(ctl.evaluate(None).is_none());
        assert!(ctl.evaluate(Some("garbage")).is_none());
        assert_eq!(ctl.last_emitted(), ThresholdState::AtOrAbove);

        // Same side after the gap: still nothing to send.
        assert!(ctl.evaluate(Some("6")).is_none());
    }

    #[test]
    fn verify_appends_reads() {
        let mut ctl = controller(true);
        let t = ctl.evaluate(Some("1")).unwrap();
        assert_eq!(t.commands.len(), 4);
        assert_eq!(
            t.commands[2..],
            [
                ControlMessage::Read {
                    object: ObjectId::OUTPUT_1,
                    property: PropertyId::FREQUENCY,
                },
                ControlMessage::Read {
                    object: ObjectId::OUTPUT_1,
                    property: PropertyId::AMPLITUDE,
                },
            ]
        );
    }
}
