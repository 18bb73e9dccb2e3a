//! Batch planner
//!
//! Splits pending samples into fixed-size batches. With category clustering
//! on, samples are grouped by category first (groups ordered by first
//! appearance, encounter order kept within a group) and each group is chunked
//! on its own, so a batch never mixes categories. Only the last batch of each
//! group may be short.

use crate::models::{Batch, Sample};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    batch_size: usize,
    cluster_by_category: bool,
}

impl BatchPlanner {
    pub fn new(batch_size: usize, cluster_by_category: bool) -> Self {
        Self {
            batch_size: batch_size.max(1),
            cluster_by_category,
        }
    }

    /// Plan batches for `remaining`, numbering them from `first_sequence`
    pub fn plan<'a, I>(&self, remaining: I, first_sequence: u64) -> Vec<Batch>
    where
        I: IntoIterator<Item = &'a Sample>,
    {
        let groups = if self.cluster_by_category {
            group_by_category(remaining)
        } else {
            vec![remaining.into_iter().collect()]
        };

        let mut sequence = first_sequence;
        let mut batches = Vec::new();
        for group in groups {
            for chunk in group.chunks(self.batch_size) {
                let members = chunk.iter().map(|s| s.id.clone()).collect();
                batches.push(Batch::new(sequence, members));
                sequence += 1;
            }
        }
        batches
    }
}

/// Groups in order of first appearance; uncategorized samples form one group
fn group_by_category<'a, I>(samples: I) -> Vec<Vec<&'a Sample>>
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut index: HashMap<Option<&'a str>, usize> = HashMap::new();
    let mut groups: Vec<Vec<&'a Sample>> = Vec::new();

    for sample in samples {
        let key = sample.category.as_deref();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(sample);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SampleId;
    use std::path::PathBuf;

    fn sample(id: &str, category: Option<&str>) -> Sample {
        Sample {
            id: SampleId::from(id),
            path: PathBuf::from(format!("/s/{id}.wav")),
            size_bytes: 1,
            duration_secs: None,
            category: category.map(str::to_string),
            local_failure: None,
        }
    }

    fn ids(batch: &Batch) -> Vec<&str> {
        batch.members.iter().map(|m| m.as_str()).collect()
    }

    #[test]
    fn test_twelve_samples_in_fives() {
        let samples: Vec<Sample> = (0..12).map(|i| sample(&format!("s{i:02}"), None)).collect();
        let batches = BatchPlanner::new(5, false).plan(&samples, 1);

        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![5, 5, 2]);
        assert_eq!(batches[0].sequence, 1);
        assert_eq!(batches[2].sequence, 3);
        assert_eq!(ids(&batches[2]), vec!["s10", "s11"]);
    }

    #[test]
    fn test_clustering_groups_by_first_appearance() {
        let samples = vec![
            sample("k1", Some("kick")),
            sample("s1", Some("snare")),
            sample("k2", Some("kick")),
            sample("u1", None),
            sample("s2", Some("snare")),
            sample("k3", Some("kick")),
        ];
        let batches = BatchPlanner::new(2, true).plan(&samples, 0);

        let planned: Vec<Vec<&str>> = batches.iter().map(ids).collect();
        assert_eq!(
            planned,
            vec![vec!["k1", "k2"], vec!["k3"], vec!["s1", "s2"], vec!["u1"]]
        );
    }

    #[test]
    fn test_clustering_without_categories_keeps_order() {
        let samples: Vec<Sample> = (0..7).map(|i| sample(&format!("x{i}"), None)).collect();
        let clustered = BatchPlanner::new(3, true).plan(&samples, 0);
        let flat = BatchPlanner::new(3, false).plan(&samples, 0);

        assert_eq!(
            clustered.iter().map(ids).collect::<Vec<_>>(),
            flat.iter().map(ids).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_batch_shape_per_group() {
        let categories = ["kick", "pad", "fx"];
        let samples: Vec<Sample> = (0..23)
            .map(|i| sample(&format!("m{i}"), Some(categories[i % 3])))
            .collect();
        let batches = BatchPlanner::new(4, true).plan(&samples, 0);

        let mut short_per_category: HashMap<String, usize> = HashMap::new();
        for batch in &batches {
            assert!(batch.len() <= 4);
            assert!(!batch.is_empty());
            if batch.len() < 4 {
                let first = samples.iter().find(|s| s.id == batch.members[0]).unwrap();
                *short_per_category.entry(first.category.clone().unwrap()).or_default() += 1;
            }
        }
        assert!(short_per_category.values().all(|n| *n <= 1));

        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 23);
    }

    #[test]
    fn test_empty_input() {
        let batches = BatchPlanner::new(5, true).plan(std::iter::empty(), 0);
        assert!(batches.is_empty());
    }
}
