//! Result Record Module
//!
//! Student keys, key ranges and the exam result record, plus the field-map
//! codec used to store a record as a cache hash.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LookupError;

// == Constants ==
/// Minimum score in every subject required to pass.
pub const PASS_MARK: i16 = 33;

/// Maximum score per subject.
pub const MAX_SCORE: i16 = 100;

/// Number of graded subjects on a result sheet.
pub const SUBJECT_COUNT: i32 = 5;

/// Field written for a cached "known absent" entry.
pub const ABSENT_FIELD: &str = "absent";

/// Ordered list of cache fields, as written to a hash.
pub type Fields = Vec<(String, String)>;

// == Student Key ==
/// Identifier of a student's result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentKey(pub i64);

impl StudentKey {
    /// Returns the raw integer value.
    pub fn get(self) -> i64 {
        self.0
    }

    /// Returns the key immediately after this one.
    pub fn next(self) -> StudentKey {
        StudentKey(self.0.saturating_add(1))
    }

    /// Cache key for this student (the decimal string form).
    pub fn cache_key(self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for StudentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for StudentKey {
    fn from(value: i64) -> Self {
        StudentKey(value)
    }
}

// == Key Range ==
/// Inclusive range of student keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    /// First key in the range
    pub start: StudentKey,
    /// Last key in the range (inclusive)
    pub end: StudentKey,
}

impl KeyRange {
    /// Creates a new range from raw ids. A `start` past `end` makes an empty range.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: StudentKey(start),
            end: StudentKey(end),
        }
    }

    /// Returns true if `key` lies inside the range.
    pub fn contains(&self, key: StudentKey) -> bool {
        key >= self.start && key <= self.end
    }

    /// Number of keys covered by the range, saturating at `u64::MAX`.
    pub fn len(&self) -> u64 {
        if self.end < self.start {
            0
        } else {
            self.end.0.abs_diff(self.start.0).saturating_add(1)
        }
    }

    /// Returns true if the range covers no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validates a key against the range.
    pub fn check(&self, key: StudentKey) -> Result<StudentKey, LookupError> {
        if self.contains(key) {
            Ok(key)
        } else {
            Err(LookupError::InvalidKey(format!(
                "student id {} outside [{}, {}]",
                key, self.start, self.end
            )))
        }
    }

    /// Parses a textual student id and validates it against the range.
    ///
    /// Only plain ASCII decimal digits are accepted: no sign, no whitespace.
    pub fn parse(&self, raw: &str) -> Result<StudentKey, LookupError> {
        if raw.is_empty() || raw.len() > 18 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(LookupError::InvalidKey(format!(
                "malformed student id '{}'",
                raw
            )));
        }
        let value: i64 = raw
            .parse()
            .map_err(|_| LookupError::InvalidKey(format!("malformed student id '{}'", raw)))?;
        self.check(StudentKey(value))
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

// == Categorical Fields ==
/// Academic stream the student sat the exam in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Science,
    Commerce,
    Arts,
}

/// Publication status of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Declared,
    Withheld,
}

/// Division awarded from the percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Division {
    First,
    Second,
    Third,
    Fail,
}

macro_rules! text_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            /// Stable textual form used by the stores.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

text_enum!(Stream { Science => "science", Commerce => "commerce", Arts => "arts" });
text_enum!(ResultStatus { Declared => "declared", Withheld => "withheld" });
text_enum!(Division { First => "first", Second => "second", Third => "third", Fail => "fail" });

// == Scores ==
/// Marks obtained in each subject (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub english: i16,
    pub mathematics: i16,
    pub physics: i16,
    pub chemistry: i16,
    pub elective: i16,
}

impl Scores {
    fn as_array(&self) -> [i16; 5] {
        [
            self.english,
            self.mathematics,
            self.physics,
            self.chemistry,
            self.elective,
        ]
    }

    /// Sum of all subject marks.
    pub fn total(&self) -> i32 {
        self.as_array().iter().map(|&s| s as i32).sum()
    }
}

/// Values derived from the scores once, when the record is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computed {
    pub total: i32,
    pub passed: bool,
    pub division: Division,
}

impl Computed {
    /// Derives the pass/fail outcome and division for a set of scores.
    pub fn derive(scores: &Scores) -> Self {
        let total = scores.total();
        let passed = scores.as_array().iter().all(|&s| s >= PASS_MARK);
        let percentage = total as f64 * 100.0 / (SUBJECT_COUNT * MAX_SCORE as i32) as f64;
        let division = if !passed {
            Division::Fail
        } else if percentage >= 60.0 {
            Division::First
        } else if percentage >= 45.0 {
            Division::Second
        } else {
            Division::Third
        };
        Self {
            total,
            passed,
            division,
        }
    }
}

// == Result Record ==
/// One student's exam result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub student_id: StudentKey,
    pub name: String,
    pub stream: Stream,
    pub scores: Scores,
    pub status: ResultStatus,
    /// Present for declared results only
    pub computed: Option<Computed>,
}

impl ResultRecord {
    /// Creates a record, deriving the computed fields for declared results.
    pub fn new(
        student_id: StudentKey,
        name: impl Into<String>,
        stream: Stream,
        scores: Scores,
        status: ResultStatus,
    ) -> Self {
        let computed = match status {
            ResultStatus::Declared => Some(Computed::derive(&scores)),
            ResultStatus::Withheld => None,
        };
        Self {
            student_id,
            name: name.into(),
            stream,
            scores,
            status,
            computed,
        }
    }

    /// Encodes the record as a list of cache hash fields.
    pub fn to_fields(&self) -> Fields {
        let mut fields = vec![
            ("student_id".to_string(), self.student_id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("stream".to_string(), self.stream.as_str().to_string()),
            ("english".to_string(), self.scores.english.to_string()),
            ("mathematics".to_string(), self.scores.mathematics.to_string()),
            ("physics".to_string(), self.scores.physics.to_string()),
            ("chemistry".to_string(), self.scores.chemistry.to_string()),
            ("elective".to_string(), self.scores.elective.to_string()),
            ("status".to_string(), self.status.as_str().to_string()),
        ];
        if let Some(computed) = &self.computed {
            fields.push(("total".to_string(), computed.total.to_string()));
            fields.push(("passed".to_string(), computed.passed.to_string()));
            fields.push((
                "division".to_string(),
                computed.division.as_str().to_string(),
            ));
        }
        fields
    }

    /// Decodes a record from cache hash fields.
    ///
    /// Computed fields are read back as stored, never re-derived.
    pub fn from_fields(fields: &[(String, String)]) -> Result<Self, String> {
        let map: HashMap<&str, &str> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        fn field<'a>(map: &HashMap<&str, &'a str>, name: &str) -> Result<&'a str, String> {
            map.get(name)
                .copied()
                .ok_or_else(|| format!("missing field '{}'", name))
        }

        fn parsed<T: FromStr>(map: &HashMap<&str, &str>, name: &str) -> Result<T, String> {
            field(map, name)?
                .parse()
                .map_err(|_| format!("invalid value for field '{}'", name))
        }

        let computed = if map.contains_key("total") {
            Some(Computed {
                total: parsed(&map, "total")?,
                passed: parsed(&map, "passed")?,
                division: field(&map, "division")?.parse()?,
            })
        } else {
            None
        };

        Ok(Self {
            student_id: StudentKey(parsed(&map, "student_id")?),
            name: field(&map, "name")?.to_string(),
            stream: field(&map, "stream")?.parse()?,
            scores: Scores {
                english: parsed(&map, "english")?,
                mathematics: parsed(&map, "mathematics")?,
                physics: parsed(&map, "physics")?,
                chemistry: parsed(&map, "chemistry")?,
                elective: parsed(&map, "elective")?,
            },
            status: field(&map, "status")?.parse()?,
            computed,
        })
    }
}

// == Cached Value ==
/// What a cache entry holds for a student key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    Record(ResultRecord),
    /// Negative entry: the durable store had no row for the key
    Absent,
}

impl CachedValue {
    /// Fields of a negative entry.
    pub fn absent_fields() -> Fields {
        vec![(ABSENT_FIELD.to_string(), "1".to_string())]
    }

    /// Returns true if the fields describe a negative entry.
    pub fn is_absent(fields: &[(String, String)]) -> bool {
        fields.iter().any(|(k, _)| k == ABSENT_FIELD)
    }

    /// Decodes fields read from the cache.
    pub fn decode(fields: &[(String, String)]) -> Result<Self, String> {
        if Self::is_absent(fields) {
            Ok(CachedValue::Absent)
        } else {
            ResultRecord::from_fields(fields).map(CachedValue::Record)
        }
    }
}

// == Record Batch ==
/// A contiguous batch of records destined for one insert.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    /// Keys covered by this batch
    pub range: KeyRange,
    pub records: Vec<ResultRecord>,
}

impl RecordBatch {
    /// Builds a batch; the range spans the smallest and largest key present.
    ///
    /// Returns None for an empty record list.
    pub fn from_records(records: Vec<ResultRecord>) -> Option<Self> {
        let start = records.iter().map(|r| r.student_id).min()?;
        let end = records.iter().map(|r| r.student_id).max()?;
        Some(Self {
            range: KeyRange { start, end },
            records,
        })
    }

    /// Splits records into batches of at most `batch_size`.
    pub fn chunk(records: Vec<ResultRecord>, batch_size: usize) -> Vec<RecordBatch> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::new();
        let mut iter = records.into_iter().peekable();
        while iter.peek().is_some() {
            let chunk: Vec<ResultRecord> = iter.by_ref().take(batch_size).collect();
            if let Some(batch) = RecordBatch::from_records(chunk) {
                batches.push(batch);
            }
        }
        batches
    }

    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
