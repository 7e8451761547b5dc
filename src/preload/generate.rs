//! Synthetic dataset generation.
//!
//! Each record is derived from an RNG seeded with its own key, so the output
//! for a key does not depend on batch size or generation order.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{KeyRange, RecordBatch, ResultRecord, ResultStatus, Scores, Stream, StudentKey};

const SEED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Share of results generated as withheld.
const WITHHELD_RATIO: f64 = 0.02;

const FIRST_NAMES: &[&str] = &[
    "Aarav", "Ananya", "Arjun", "Diya", "Ishaan", "Kavya", "Meera", "Nikhil", "Priya", "Rahul",
    "Rohan", "Saanvi", "Sneha", "Tanvi", "Vihaan", "Zoya",
];

const LAST_NAMES: &[&str] = &[
    "Bose", "Das", "Gupta", "Iyer", "Joshi", "Kapoor", "Khan", "Mehta", "Nair", "Patel", "Rao",
    "Reddy", "Sharma", "Singh", "Verma",
];

/// Generates the record for `key`.
pub fn generate_record(key: StudentKey) -> ResultRecord {
    let mut rng = StdRng::seed_from_u64(key.get() as u64 ^ SEED_SALT);

    let name = format!(
        "{} {}",
        FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())],
        LAST_NAMES[rng.random_range(0..LAST_NAMES.len())]
    );
    let stream = match rng.random_range(0..3) {
        0 => Stream::Science,
        1 => Stream::Commerce,
        _ => Stream::Arts,
    };
    let scores = Scores {
        english: rng.random_range(20..=100),
        mathematics: rng.random_range(15..=100),
        physics: rng.random_range(20..=100),
        chemistry: rng.random_range(20..=100),
        elective: rng.random_range(25..=100),
    };
    let status = if rng.random_bool(WITHHELD_RATIO) {
        ResultStatus::Withheld
    } else {
        ResultStatus::Declared
    };

    ResultRecord::new(key, name, stream, scores, status)
}

// == Batch Iterator ==
/// Lazily generated consecutive batches covering a key range.
#[derive(Debug, Clone)]
pub struct BatchIter {
    next: Option<i64>,
    end: i64,
    batch_size: i64,
}

impl Iterator for BatchIter {
    type Item = RecordBatch;

    fn next(&mut self) -> Option<RecordBatch> {
        let start = self.next.filter(|&start| start <= self.end)?;
        let stop = start.saturating_add(self.batch_size - 1).min(self.end);
        self.next = if stop < self.end { Some(stop + 1) } else { None };

        let records = (start..=stop).map(|k| generate_record(StudentKey(k))).collect();
        Some(RecordBatch {
            range: KeyRange::new(start, stop),
            records,
        })
    }
}

/// Batches of at most `batch_size` generated records covering `range`.
pub fn batches(range: KeyRange, batch_size: usize) -> BatchIter {
    BatchIter {
        next: Some(range.start.get()),
        end: range.end.get(),
        batch_size: batch_size.clamp(1, i64::MAX as usize) as i64,
    }
}
