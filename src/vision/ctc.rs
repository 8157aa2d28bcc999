//! CTC greedy decoding with auto-detected tensor layout
//!
//! The recognizer emits `[1, d1, d2]` where either axis may be the sequence.
//! Both readings are decoded. A reading whose class count is close to the
//! dictionary size is preferred; when both or neither are, the longer text wins.

use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};
use serde::Serialize;
use tracing::debug;

use super::dictionary::Dictionary;
use super::prob_map::normalize_score;

/// Index of the CTC blank in every dictionary
pub const BLANK_INDEX: usize = 0;

/// Recognized text with its averaged confidence
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognitionResult {
    /// Recognized text
    pub text: String,
    /// Mean confidence of the emitted symbols (0.0 - 1.0)
    pub confidence: f32,
}

impl RecognitionResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }

    /// Empty text, confidence 0
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// How the two non-batch axes of the recognizer output are read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisLayout {
    /// (batch, time, class): sequence = d1, classes = d2
    Ntc,
    /// (batch, class, time): sequence = d2, classes = d1
    Nct,
}

impl AxisLayout {
    /// (sequence length, class count) for a `(d1, d2)` plane
    pub fn dims(self, d1: usize, d2: usize) -> (usize, usize) {
        match self {
            AxisLayout::Ntc => (d1, d2),
            AxisLayout::Nct => (d2, d1),
        }
    }

    /// Score of `class` at step `t`
    fn score(self, plane: &ArrayView2<'_, f32>, t: usize, class: usize) -> f32 {
        match self {
            AxisLayout::Ntc => plane[[t, class]],
            AxisLayout::Nct => plane[[class, t]],
        }
    }
}

/// Result of decoding under one layout
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub layout: AxisLayout,
    pub class_count: usize,
    pub emitted: usize,
    pub result: RecognitionResult,
}

/// Decode a recognizer output tensor against `dictionary`.
///
/// `tolerance` is how far a layout's class count may be from the dictionary
/// size and still count as plausible.
pub fn decode(
    output: ArrayViewD<'_, f32>,
    dictionary: &Dictionary,
    tolerance: usize,
) -> RecognitionResult {
    let Some(plane) = output_plane(output) else {
        debug!("Unexpected recognizer output rank, returning empty result");
        return RecognitionResult::empty();
    };

    let ntc = greedy_decode(&plane, AxisLayout::Ntc, dictionary);
    let nct = greedy_decode(&plane, AxisLayout::Nct, dictionary);
    let chosen = choose_hypothesis(ntc, nct, dictionary.len(), tolerance);

    debug!(
        "CTC decode {:?}: layout {:?}, {} symbols, confidence {:.3}",
        plane.dim(),
        chosen.layout,
        chosen.emitted,
        chosen.result.confidence
    );
    chosen.result
}

/// Greedy best-path decoding under one layout.
///
/// A symbol is emitted when the step's argmax is not blank, differs from the
/// previous step's argmax, and is inside the dictionary. The previous index is
/// updated on every step.
pub fn greedy_decode(
    plane: &ArrayView2<'_, f32>,
    layout: AxisLayout,
    dictionary: &Dictionary,
) -> Hypothesis {
    let (d1, d2) = plane.dim();
    let (seq_len, class_count) = layout.dims(d1, d2);

    let mut text = String::new();
    let mut emitted = 0usize;
    let mut confidence_sum = 0.0f32;
    let mut prev_idx: Option<usize> = None;

    if class_count > 0 {
        for t in 0..seq_len {
            let mut max_idx = 0;
            let mut max_val = f32::NEG_INFINITY;
            for c in 0..class_count {
                let value = layout.score(plane, t, c);
                if value > max_val {
                    max_val = value;
                    max_idx = c;
                }
            }

            if max_idx != BLANK_INDEX && prev_idx != Some(max_idx) {
                if let Some(symbol) = dictionary.get(max_idx) {
                    text.push_str(symbol);
                    confidence_sum += normalize_score(max_val);
                    emitted += 1;
                }
            }
            prev_idx = Some(max_idx);
        }
    }

    let confidence = if emitted == 0 {
        0.0
    } else {
        confidence_sum / emitted as f32
    };

    Hypothesis {
        layout,
        class_count,
        emitted,
        result: RecognitionResult { text, confidence },
    }
}

/// Pick between the two layouts.
///
/// A layout is plausible when its class count is within `tolerance` of the
/// dictionary size. Exactly one plausible layout wins outright; otherwise the
/// longer text wins, then the higher confidence, then NTC.
pub fn choose_hypothesis(
    ntc: Hypothesis,
    nct: Hypothesis,
    dictionary_len: usize,
    tolerance: usize,
) -> Hypothesis {
    let plausible = |h: &Hypothesis| h.class_count.abs_diff(dictionary_len) <= tolerance;

    match (plausible(&ntc), plausible(&nct)) {
        (true, false) => ntc,
        (false, true) => nct,
        _ => {
            let ntc_len = ntc.result.text.chars().count();
            let nct_len = nct.result.text.chars().count();
            if nct_len > ntc_len
                || (nct_len == ntc_len && nct.result.confidence > ntc.result.confidence)
            {
                nct
            } else {
                ntc
            }
        }
    }
}

/// Drop the batch axis and return the `(d1, d2)` plane
fn output_plane(output: ArrayViewD<'_, f32>) -> Option<ArrayView2<'_, f32>> {
    let plane = match output.ndim() {
        2 => output,
        3 if output.shape()[0] > 0 => output.index_axis_move(Axis(0), 0),
        _ => return None,
    };
    plane.into_dimensionality::<Ix2>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, ArrayD};

    fn dictionary(n: usize) -> Dictionary {
        // n symbols including the blank
        Dictionary::from_lines((1..n).map(|i| format!("s{}", i)))
    }

    /// `[1, steps, classes]` tensor with one-hot rows
    fn ntc_tensor(argmax: &[usize], classes: usize, values: &[f32]) -> ArrayD<f32> {
        let mut t = Array3::<f32>::zeros((1, argmax.len(), classes));
        for (step, (&idx, &v)) in argmax.iter().zip(values).enumerate() {
            t[[0, step, idx]] = v;
        }
        t.into_dyn()
    }

    /// `[1, steps, classes]` tensor where every row is a softmax peaked at `argmax`
    fn softmax_tensor(argmax: &[usize], classes: usize, peak: f32) -> ArrayD<f32> {
        let rest = (1.0 - peak) / (classes - 1) as f32;
        let mut t = Array3::<f32>::from_elem((1, argmax.len(), classes), rest);
        for (step, &idx) in argmax.iter().enumerate() {
            t[[0, step, idx]] = peak;
        }
        t.into_dyn()
    }

    fn plane(output: &ArrayD<f32>) -> ArrayView2<'_, f32> {
        output
            .view()
            .index_axis_move(Axis(0), 0)
            .into_dimensionality::<Ix2>()
            .unwrap()
    }

    #[test]
    fn test_ctc_collapsing() {
        let dict = Dictionary::from_lines(["a", "b", "c", "d"]);
        assert_eq!(dict.len(), 5);

        let argmax = [0, 0, 3, 3, 0, 4, 4, 4, 0];
        let values = [0.9, 0.9, 0.8, 0.7, 0.9, 0.6, 0.95, 0.5, 0.9];
        let output = ntc_tensor(&argmax, 5, &values);

        let result = decode(output.view(), &dict, 500);
        assert_eq!(result.text, "cd");
        // Averaged over exactly the two emissions (0.8 and 0.6)
        assert!((result.confidence - 0.7).abs() < 1e-6);

        let plane = plane(&output);
        let ntc = greedy_decode(&plane, AxisLayout::Ntc, &dict);
        assert_eq!(ntc.emitted, 2);
    }

    #[test]
    fn test_repeat_after_blank_is_emitted_again() {
        let dict = Dictionary::from_lines(["a", "b"]);
        let output = ntc_tensor(&[1, 0, 1, 1, 2], 3, &[1.0; 5]);

        let plane = plane(&output);
        let result = greedy_decode(&plane, AxisLayout::Ntc, &dict).result;
        assert_eq!(result.text, "aab");
    }

    #[test]
    fn test_out_of_range_index_is_skipped_but_tracked() {
        // Index 5 is past the dictionary: skipped, yet it still breaks the run of 1s
        let dict = Dictionary::from_lines(["a", "b"]);
        let output = ntc_tensor(&[1, 5, 1], 6, &[0.9; 3]);

        let plane = plane(&output);
        let result = greedy_decode(&plane, AxisLayout::Ntc, &dict).result;
        assert_eq!(result.text, "aa");
    }

    #[test]
    fn test_logit_scores_are_normalized() {
        let dict = Dictionary::from_lines(["a"]);
        let output = ntc_tensor(&[1], 2, &[3.0]);

        let plane = plane(&output);
        let result = greedy_decode(&plane, AxisLayout::Ntc, &dict).result;
        let expected = 1.0 / (1.0 + (-3.0f32).exp());
        assert!((result.confidence - expected).abs() < 1e-6);
    }

    #[test]
    fn test_class_axis_last_is_decoded_as_ntc() {
        // [1, 5, 100]: only the last axis has as many classes as the dictionary
        let dict = dictionary(100);
        let output = softmax_tensor(&[10, 11, 12, 13, 14], 100, 0.6);

        let result = decode(output.view(), &dict, 50);
        assert_eq!(result.text, "s10s11s12s13s14");
        assert!((result.confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_class_axis_middle_is_decoded_as_nct() {
        // [1, 100, 5]: every column is a softmax over 100 classes peaked at 20 + t
        let dict = dictionary(100);
        let rest = 0.4 / 99.0;
        let mut output = Array3::<f32>::from_elem((1, 100, 5), rest);
        for t in 0..5 {
            output[[0, 20 + t, t]] = 0.6;
        }

        let result = decode(output.into_dyn().view(), &dict, 50);
        assert_eq!(result.text, "s20s21s22s23s24");
    }

    #[test]
    fn test_plausibility_decides_before_text_length() {
        // [1, 100, 5] whose [T, C] reading (100 steps over 5 classes) is a long
        // run of alternating glyphs, while the [C, T] reading is s20..s24
        let dict = dictionary(100);
        let mut output = Array3::<f32>::zeros((1, 100, 5));
        for c in 1..100 {
            output[[0, c, c % 4 + 1]] = 0.3;
        }
        for t in 0..5 {
            output[[0, 20 + t, t]] = 0.9;
        }
        let output = output.into_dyn();

        let ntc = greedy_decode(&plane(&output), AxisLayout::Ntc, &dict);
        assert!(ntc.result.text.chars().count() > "s20s21s22s23s24".len());

        // 5 classes is within 500 of 100: both layouts plausible, longer text wins
        let loose = decode(output.view(), &dict, 500);
        assert_eq!(loose, ntc.result);

        // 5 classes is not within 50 of 100: only the [C, T] reading is plausible
        let strict = decode(output.view(), &dict, 50);
        assert_eq!(strict.text, "s20s21s22s23s24");
    }

    #[test]
    fn test_single_plausible_layout_wins_over_longer_text() {
        let dict = dictionary(6000);
        let short = Hypothesis {
            layout: AxisLayout::Nct,
            class_count: 6000,
            emitted: 1,
            result: RecognitionResult::new("x", 0.5),
        };
        let long = Hypothesis {
            layout: AxisLayout::Ntc,
            class_count: 40,
            emitted: 5,
            result: RecognitionResult::new("abcde", 0.9),
        };

        let chosen = choose_hypothesis(long, short, dict.len(), 500);
        assert_eq!(chosen.layout, AxisLayout::Nct);
        assert_eq!(chosen.result.text, "x");
    }

    #[test]
    fn test_ambiguous_layouts_prefer_longer_then_confidence() {
        let make = |layout, text: &str, conf| Hypothesis {
            layout,
            class_count: 100,
            emitted: text.len(),
            result: RecognitionResult::new(text, conf),
        };

        let chosen = choose_hypothesis(
            make(AxisLayout::Ntc, "ab", 0.9),
            make(AxisLayout::Nct, "abc", 0.1),
            100,
            500,
        );
        assert_eq!(chosen.layout, AxisLayout::Nct);

        let chosen = choose_hypothesis(
            make(AxisLayout::Ntc, "ab", 0.4),
            make(AxisLayout::Nct, "cd", 0.6),
            100,
            500,
        );
        assert_eq!(chosen.layout, AxisLayout::Nct);

        // Neither plausible: same rule applies
        let chosen = choose_hypothesis(
            make(AxisLayout::Ntc, "abc", 0.4),
            make(AxisLayout::Nct, "cd", 0.6),
            5000,
            500,
        );
        assert_eq!(chosen.layout, AxisLayout::Ntc);
    }

    #[test]
    fn test_unsupported_rank_is_empty() {
        let dict = dictionary(10);
        let output = ArrayD::<f32>::zeros(ndarray::IxDyn(&[1, 1, 4, 10]));
        assert_eq!(decode(output.view(), &dict, 500), RecognitionResult::empty());
    }

    #[test]
    fn test_all_blank_is_empty_with_zero_confidence() {
        let dict = dictionary(10);
        let output = ntc_tensor(&[0, 0, 0], 10, &[0.99; 3]);
        let result = decode(output.view(), &dict, 500);
        assert!(result.is_empty());
        assert_eq!(result.confidence, 0.0);
    }
}
