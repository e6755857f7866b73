// Codebooks mapping decoding targets to reference intensity vectors.

use anyhow::{bail, Context, Result};
use json::JsonValue;
use ndarray::{Array2, ArrayView1, ArrayView2};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use tracing::info;

use crate::errors::DecodeError;

// Codewords are stored round-major, in the same order as pixel traces: entry
// `r * nchannels + c` is the expected signal in round r, channel c. Target
// order is the order entries were given, and it is the order used to break
// ties when decoding.
#[derive(Clone, Debug)]
pub struct Codebook {
    nrounds: usize,
    nchannels: usize,
    targets: Vec<String>,
    codewords: Array2<f32>,
    blank: Vec<bool>,
    target_index: HashMap<String, usize>,
}

impl Codebook {
    pub fn new(
        nrounds: usize,
        nchannels: usize,
        entries: Vec<(String, Vec<f32>)>,
        blank_pattern: Option<&Regex>,
    ) -> Result<Self, DecodeError> {
        if entries.is_empty() {
            return Err(DecodeError::EmptyCodebook);
        }

        let len = nrounds * nchannels;
        let mut targets = Vec::with_capacity(entries.len());
        let mut codewords = Array2::<f32>::zeros((entries.len(), len));
        let mut blank = Vec::with_capacity(entries.len());
        let mut target_index = HashMap::new();

        for (i, (target, codeword)) in entries.into_iter().enumerate() {
            if codeword.len() != len {
                return Err(DecodeError::ShapeMismatch {
                    what: "codeword length",
                    expected: len,
                    found: codeword.len(),
                });
            }

            for (k, &v) in codeword.iter().enumerate() {
                if !v.is_finite() || v < 0.0 {
                    return Err(DecodeError::InvalidIntensity {
                        location: format!(
                            "codeword '{}' round={} channel={}",
                            target,
                            k / nchannels,
                            k % nchannels
                        ),
                        value: v,
                    });
                }
            }

            if target_index.insert(target.clone(), i).is_some() {
                return Err(DecodeError::DuplicateTarget(target));
            }

            let is_zero = codeword.iter().all(|&v| v == 0.0);
            let matches_pattern = blank_pattern.map_or(false, |re| re.is_match(&target));
            blank.push(is_zero || matches_pattern);

            codewords.row_mut(i).assign(&ArrayView1::from(codeword.as_slice()));
            targets.push(target);
        }

        return Ok(Self {
            nrounds,
            nchannels,
            targets,
            codewords,
            blank,
            target_index,
        });
    }

    pub fn nrounds(&self) -> usize {
        self.nrounds
    }

    pub fn nchannels(&self) -> usize {
        self.nchannels
    }

    pub fn ntargets(&self) -> usize {
        self.targets.len()
    }

    pub fn code_length(&self) -> usize {
        self.nrounds * self.nchannels
    }

    pub fn target_name(&self, i: usize) -> &str {
        &self.targets[i]
    }

    pub fn target_names(&self) -> &[String] {
        &self.targets
    }

    pub fn target_index(&self, target: &str) -> Option<usize> {
        self.target_index.get(target).cloned()
    }

    pub fn codeword(&self, i: usize) -> ArrayView1<f32> {
        self.codewords.row(i)
    }

    pub fn codewords(&self) -> ArrayView2<f32> {
        self.codewords.view()
    }

    pub fn is_blank(&self, i: usize) -> bool {
        self.blank[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, ArrayView1<f32>)> + '_ {
        self.targets
            .iter()
            .enumerate()
            .map(move |(i, target)| (i, target.as_str(), self.codewords.row(i)))
    }
}

fn json_index(value: &JsonValue, key: &str, target: &str) -> Result<usize> {
    value[key]
        .as_usize()
        .with_context(|| format!("Codeword entry for '{}' has no valid '{}'", target, key))
}

// Parse a JSON codebook of sparse codewords:
//
//   {"mappings": [{"codeword": [{"r": 0, "c": 1, "v": 1}, ...], "target": "ACTA2"}, ...]}
//
// Round/channel pairs that are not listed are zero. Extents are inferred as
// one past the largest index unless given.
pub fn parse_codebook_json(
    contents: &str,
    nrounds: Option<usize>,
    nchannels: Option<usize>,
    blank_pattern: Option<&Regex>,
) -> Result<Codebook> {
    let doc = json::parse(contents)?;
    let mappings = &doc["mappings"];
    if !mappings.is_array() {
        bail!("Codebook has no 'mappings' array");
    }

    let mut sparse_entries = Vec::new();
    let mut max_round = 0;
    let mut max_channel = 0;
    for mapping in mappings.members() {
        let target = mapping["target"]
            .as_str()
            .context("Codebook mapping without a 'target'")?
            .to_string();

        let mut values = Vec::new();
        for cw in mapping["codeword"].members() {
            let r = json_index(cw, "r", &target)?;
            let c = json_index(cw, "c", &target)?;
            let v = cw["v"]
                .as_f32()
                .with_context(|| format!("Codeword entry for '{}' has no valid 'v'", target))?;
            max_round = max_round.max(r + 1);
            max_channel = max_channel.max(c + 1);
            values.push((r, c, v));
        }
        sparse_entries.push((target, values));
    }

    let nrounds = nrounds.unwrap_or(max_round);
    let nchannels = nchannels.unwrap_or(max_channel);
    if max_round > nrounds || max_channel > nchannels {
        return Err(DecodeError::ShapeMismatch {
            what: "codebook round x channel extent",
            expected: nrounds * nchannels,
            found: max_round * max_channel,
        }
        .into());
    }

    let entries = sparse_entries
        .into_iter()
        .map(|(target, values)| {
            let mut codeword = vec![0.0; nrounds * nchannels];
            for (r, c, v) in values {
                codeword[r * nchannels + c] = v;
            }
            (target, codeword)
        })
        .collect();

    return Ok(Codebook::new(nrounds, nchannels, entries, blank_pattern)?);
}

pub fn read_codebook_json(
    filename: &str,
    nrounds: Option<usize>,
    nchannels: Option<usize>,
    blank_pattern: Option<&Regex>,
) -> Result<Codebook> {
    let contents =
        fs::read_to_string(filename).with_context(|| format!("Unable to open '{}'.", filename))?;
    let codebook = parse_codebook_json(&contents, nrounds, nchannels, blank_pattern)
        .with_context(|| format!("Invalid codebook '{}'", filename))?;

    info!(
        targets = codebook.ntargets(),
        blanks = codebook.blank.iter().filter(|&&b| b).count(),
        rounds = codebook.nrounds(),
        channels = codebook.nchannels(),
        "read codebook"
    );

    return Ok(codebook);
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODEBOOK_JSON: &str = r#"{
        "version": "0.0.0",
        "mappings": [
            {"codeword": [{"r": 0, "c": 0, "v": 1}, {"r": 1, "c": 1, "v": 1}], "target": "ACTA2"},
            {"codeword": [{"r": 0, "c": 1, "v": 1}, {"r": 1, "c": 0, "v": 0.5}], "target": "GAPDH"},
            {"codeword": [], "target": "empty"},
            {"codeword": [{"r": 1, "c": 1, "v": 1}], "target": "Blank-03"}
        ]
    }"#;

    #[test]
    fn test_parse_codebook_json() {
        let re = Regex::new("(?i)^blank").unwrap();
        let codebook = parse_codebook_json(CODEBOOK_JSON, None, None, Some(&re)).unwrap();

        assert_eq!(codebook.ntargets(), 4);
        assert_eq!(codebook.nrounds(), 2);
        assert_eq!(codebook.nchannels(), 2);
        assert_eq!(codebook.codeword(0).to_vec(), vec![1.0, 0.0, 0.0, 1.0]);
        assert_eq!(codebook.codeword(1).to_vec(), vec![0.0, 1.0, 0.5, 0.0]);
        assert_eq!(codebook.target_index("GAPDH"), Some(1));
        assert_eq!(codebook.target_index("missing"), None);

        assert!(!codebook.is_blank(0));
        assert!(!codebook.is_blank(1));
        assert!(codebook.is_blank(2));
        assert!(codebook.is_blank(3));
    }

    #[test]
    fn test_parse_with_explicit_extent() {
        let codebook = parse_codebook_json(CODEBOOK_JSON, Some(3), Some(2), None).unwrap();
        assert_eq!(codebook.code_length(), 6);
        assert!(!codebook.is_blank(3));

        let err = parse_codebook_json(CODEBOOK_JSON, Some(1), Some(2), None);
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_codebook() {
        let err = Codebook::new(2, 1, Vec::new(), None).unwrap_err();
        assert_eq!(err, DecodeError::EmptyCodebook);
    }

    #[test]
    fn test_codeword_length_mismatch() {
        let err = Codebook::new(2, 2, vec![("a".to_string(), vec![1.0, 0.0])], None).unwrap_err();
        assert!(matches!(err, DecodeError::ShapeMismatch { expected: 4, found: 2, .. }));
    }

    #[test]
    fn test_duplicate_target() {
        let entries = vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("a".to_string(), vec![0.0, 1.0]),
        ];
        let err = Codebook::new(2, 1, entries, None).unwrap_err();
        assert_eq!(err, DecodeError::DuplicateTarget("a".to_string()));
    }

    #[test]
    fn test_negative_weight() {
        let entries = vec![("a".to_string(), vec![1.0, -0.5])];
        assert!(matches!(
            Codebook::new(2, 1, entries, None),
            Err(DecodeError::InvalidIntensity { .. })
        ));
    }

    #[test]
    fn test_iteration_order() {
        let entries = vec![
            ("b".to_string(), vec![0.0, 1.0]),
            ("a".to_string(), vec![1.0, 0.0]),
        ];
        let codebook = Codebook::new(2, 1, entries, None).unwrap();
        let names: Vec<&str> = codebook.iter().map(|(_, name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
