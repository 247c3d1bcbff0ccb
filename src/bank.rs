use std::{collections::HashSet, path::Path};

use serde::Deserialize;

use crate::{assessment::QuestionStyle, catalog::ContentError};

/// Minimum distinct descriptions a non-empty bank needs to fill four options.
pub const MIN_DISTINCT_DESCRIPTIONS: usize = 4;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BankRecord {
    #[serde(rename = "Concept")]
    pub concept: String,
    #[serde(rename = "Description")]
    pub description: String,
}

impl BankRecord {
    pub fn new(concept: &str, description: &str) -> Self {
        Self {
            concept: concept.to_string(),
            description: description.to_string(),
        }
    }
}

/// Concept/description records for one course's diagnostic questions.
#[derive(Debug, Clone)]
pub struct QuestionBank {
    pub course: String,
    pub style: QuestionStyle,
    pub records: Vec<BankRecord>,
}

impl QuestionBank {
    pub fn new(
        course: &str,
        style: QuestionStyle,
        records: Vec<BankRecord>,
    ) -> Result<Self, ContentError> {
        let distinct: HashSet<&str> = records.iter().map(|r| r.description.as_str()).collect();
        if !records.is_empty() && distinct.len() < MIN_DISTINCT_DESCRIPTIONS {
            return Err(ContentError::Invalid(format!(
                "bank for {course} has {} distinct descriptions, need at least {MIN_DISTINCT_DESCRIPTIONS}",
                distinct.len()
            )));
        }
        Ok(Self {
            course: course.to_string(),
            style,
            records,
        })
    }

    pub fn load(course: &str, style: QuestionStyle, path: &Path) -> Result<Self, ContentError> {
        let csv_err = |source| ContentError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
        let mut records = Vec::new();
        for row in reader.deserialize::<BankRecord>() {
            let record = row.map_err(csv_err)?;
            if record.concept.trim().is_empty() || record.description.trim().is_empty() {
                continue;
            }
            records.push(record);
        }
        tracing::debug!(course, records = records.len(), "loaded assessment bank");
        Self::new(course, style, records)
    }
}

/// The three diagnostic banks, in scoring and tie-break order.
#[derive(Debug, Clone, Default)]
pub struct AssessmentBanks {
    pub banks: Vec<QuestionBank>,
}

impl AssessmentBanks {
    /// (course, file, style) for the banks shipped in `DATA_DIR`.
    pub const FILES: [(&'static str, &'static str, QuestionStyle); 3] = [
        ("data_analytics", "data_analytics_new.csv", QuestionStyle::Descriptive),
        ("full_stack", "full_stack_new.csv", QuestionStyle::Application),
        ("python", "python_new.csv", QuestionStyle::Analytical),
    ];

    pub fn load(dir: &Path) -> Result<Self, ContentError> {
        let banks = Self::FILES
            .iter()
            .map(|(course, file, style)| QuestionBank::load(course, *style, &dir.join(file)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { banks })
    }

    pub fn courses(&self) -> impl Iterator<Item = &str> {
        self.banks.iter().map(|b| b.course.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn reads_concept_description_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("python_new.csv");
        fs::write(
            &path,
            "Concept,Description\n\
             List,\"An ordered, mutable sequence\"\n\
             Tuple,An immutable sequence\n\
             Dict,A key-value mapping\n\
             Set,An unordered collection of unique items\n\
             ,skipped row\n",
        )
        .unwrap();
        let bank = QuestionBank::load("python", QuestionStyle::Analytical, &path).unwrap();
        assert_eq!(bank.records.len(), 4);
        assert_eq!(bank.records[0].description, "An ordered, mutable sequence");
    }

    #[test]
    fn empty_bank_is_allowed() {
        let bank = QuestionBank::new("python", QuestionStyle::Analytical, vec![]).unwrap();
        assert!(bank.records.is_empty());
    }

    #[test]
    fn rejects_bank_with_too_few_distinct_descriptions() {
        let records = vec![
            BankRecord::new("A", "same"),
            BankRecord::new("B", "same"),
            BankRecord::new("C", "other"),
            BankRecord::new("D", "third"),
        ];
        assert!(QuestionBank::new("python", QuestionStyle::Descriptive, records).is_err());
    }

    #[test]
    fn missing_file_is_csv_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AssessmentBanks::load(dir.path()).unwrap_err();
        assert!(matches!(err, ContentError::Csv { .. }));
    }

    #[test]
    fn wrong_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bank.csv");
        fs::write(&path, "Term,Meaning\nA,B\n").unwrap();
        assert!(QuestionBank::load("python", QuestionStyle::Descriptive, &path).is_err());
    }
}
