use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use super::token::BatchToken;

/// Delimiter between the dataset id and the token in a staged object name.
pub const NAME_DELIMITER: &str = "__";

/// A staged object whose name follows `<dataset_id>__<token>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedObject {
    /// Full object key, prefix included.
    pub key: String,
    pub dataset_id: String,
    pub token: BatchToken,
    pub extension: Option<String>,
}

impl StagedObject {
    /// Parse an object key. Returns `None` for names that do not follow the
    /// naming convention or whose token is not a valid timestamp.
    pub fn parse(key: &str) -> Option<Self> {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        let (dataset_id, rest) = file_name.split_once(NAME_DELIMITER)?;
        let (token, extension) = match rest.split_once('.') {
            Some((token, ext)) => (token, Some(ext.to_string())),
            None => (rest, None),
        };
        let token = BatchToken::parse(token).ok()?;

        Some(Self {
            key: key.to_string(),
            dataset_id: dataset_id.to_string(),
            token,
            extension,
        })
    }

    /// Build the key an extraction run writes for one dataset.
    pub fn key_for(prefix: &str, dataset_id: &str, token: &BatchToken, extension: &str) -> String {
        format!("{prefix}{dataset_id}{NAME_DELIMITER}{token}.{extension}")
    }
}

/// One extraction run's staged output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub token: BatchToken,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Keys of the objects sharing this token.
    pub objects: Vec<String>,
}

/// Group object keys into batches, most recent first.
///
/// Keys that are not staged object names are ignored.
pub fn group_batches<'a, I>(keys: I) -> Vec<Batch>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut grouped: BTreeMap<BatchToken, Vec<String>> = BTreeMap::new();
    for key in keys {
        if let Some(object) = StagedObject::parse(key) {
            grouped.entry(object.token).or_default().push(object.key);
        }
    }

    grouped
        .into_iter()
        .rev()
        .map(|(token, objects)| Batch {
            token,
            date: token.date(),
            time: token.time(),
            objects,
        })
        .collect()
}

/// Staged object count for one category marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub marker: String,
    pub count: usize,
}

/// Staged objects tallied by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedObjectCounts {
    pub categories: Vec<CategoryCount>,
    /// Sum of the category counts; uncategorized objects are not included.
    pub total: usize,
}

impl StagedObjectCounts {
    /// All-zero counts for the given markers.
    pub fn zero<S: AsRef<str>>(markers: &[S]) -> Self {
        Self {
            categories: markers
                .iter()
                .map(|m| CategoryCount {
                    marker: m.as_ref().to_string(),
                    count: 0,
                })
                .collect(),
            total: 0,
        }
    }

    /// Tally keys by substring match; the first matching marker wins.
    pub fn tally<'a, I, S>(keys: I, markers: &[S]) -> Self
    where
        I: IntoIterator<Item = &'a str>,
        S: AsRef<str>,
    {
        let mut counts = Self::zero(markers);
        for key in keys {
            if let Some(category) = counts
                .categories
                .iter_mut()
                .find(|c| key.contains(c.marker.as_str()))
            {
                category.count += 1;
                counts.total += 1;
            }
        }
        counts
    }

    pub fn count_for(&self, marker: &str) -> usize {
        self.categories
            .iter()
            .find(|c| c.marker == marker)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}
