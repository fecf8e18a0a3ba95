/// Address-space transformation: a piecewise relabeling of token
/// positions, described by rules (source, destination, length) over
/// disjoint source intervals. Applied when files are rewritten in place
/// and their token ranges move.
use std::collections::BTreeMap;

use crate::extent::Offset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformationRule {
    pub source: Offset,
    pub destination: Offset,
    pub length: u32,
}

pub struct AddressSpaceTransformation {
    source: Vec<Offset>,
    destination: Vec<Offset>,
    length: Vec<u32>,
}

impl AddressSpaceTransformation {
    /// Build from a rule set; zero-length rules are dropped.
    pub fn new(rules: &[TransformationRule]) -> AddressSpaceTransformation {
        let mut kept: Vec<TransformationRule> =
            rules.iter().copied().filter(|r| r.length > 0).collect();
        kept.sort_by_key(|r| r.source);
        AddressSpaceTransformation {
            source: kept.iter().map(|r| r.source).collect(),
            destination: kept.iter().map(|r| r.destination).collect(),
            length: kept.iter().map(|r| r.length).collect(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.source.len()
    }

    /// Swap sources and destinations.
    pub fn invert(&self) -> AddressSpaceTransformation {
        let rules: Vec<TransformationRule> = (0..self.source.len())
            .map(|i| TransformationRule {
                source: self.destination[i],
                destination: self.source[i],
                length: self.length[i],
            })
            .collect();
        AddressSpaceTransformation::new(&rules)
    }

    /// Relabel a sorted posting array in place. Postings outside every
    /// rule keep their value; the array is re-sorted afterwards because
    /// rules can shuffle relative order.
    pub fn transform(&self, postings: &mut [Offset]) {
        let n = self.source.len();
        if postings.is_empty() || n == 0 {
            return;
        }
        let first = self.source[0];
        let last = self.source[n - 1] + self.length[n - 1] as Offset - 1;

        let mut prev_rule = 0usize;

        // Skip postings below every rule.
        let mut i = 0;
        while i < postings.len() && postings[i] < first {
            i += 1;
        }

        while i < postings.len() && postings[i] <= last {
            let p = postings[i];
            if p >= self.source[prev_rule]
                && p < self.source[prev_rule] + self.length[prev_rule] as Offset
            {
                postings[i] = p + self.destination[prev_rule] - self.source[prev_rule];
            } else {
                // Gallop from the previous rule, then binary search for
                // the last rule starting at or before p.
                let mut lower = prev_rule;
                let mut delta = 1usize;
                while lower + delta < n
                    && self.source[lower + delta] + self.length[lower + delta] as Offset <= p
                {
                    lower += delta;
                    delta *= 2;
                }
                let mut upper = (lower + delta).min(n - 1);
                while lower < upper {
                    let middle = (lower + upper + 1) >> 1;
                    if self.source[middle] > p {
                        upper = middle - 1;
                    } else {
                        lower = middle;
                    }
                }
                prev_rule = lower;
                if p >= self.source[lower] && p < self.source[lower] + self.length[lower] as Offset
                {
                    postings[i] = p + self.destination[lower] - self.source[lower];
                }
            }
            i += 1;
        }

        postings.sort_unstable();
    }
}

/// Owns the transformation rules of a live index: initial token counts
/// per file and the relabeling accumulated over file rewrites.
#[derive(Default)]
pub struct TransformationRegistry {
    initial_token_count: BTreeMap<Offset, Offset>,
    rules: BTreeMap<Offset, TransformationRule>,
    rules_for_file: BTreeMap<Offset, Vec<Offset>>,
}

impl TransformationRegistry {
    pub fn new() -> TransformationRegistry {
        TransformationRegistry::default()
    }

    pub fn set_initial_token_count(&mut self, file_start: Offset, token_count: Offset) {
        self.initial_token_count.insert(file_start, token_count);
    }

    pub fn initial_token_count(&self, file_start: Offset) -> Offset {
        self.initial_token_count
            .get(&file_start)
            .copied()
            .unwrap_or(0)
    }

    /// Forget everything known about the file at `file_start`.
    pub fn remove_rules(&mut self, file_start: Offset) {
        self.initial_token_count.remove(&file_start);
        if let Some(keys) = self.rules_for_file.remove(&file_start) {
            for key in keys {
                self.rules.remove(&key);
            }
        }
    }

    /// The file at `old_file_start` moved to `new_file_start`; existing
    /// rules pointing at the old location are redirected, and a new rule
    /// covering the old range is added.
    pub fn update_rules(
        &mut self,
        old_file_start: Offset,
        new_file_start: Offset,
        length: Offset,
    ) {
        let mut keys_for_file = Vec::new();
        if let Some(old_keys) = self.rules_for_file.remove(&old_file_start) {
            for key in old_keys {
                if let Some(rule) = self.rules.get_mut(&key) {
                    rule.destination = new_file_start;
                }
                keys_for_file.push(key);
            }
        }
        keys_for_file.push(old_file_start);

        self.rules.insert(
            old_file_start,
            TransformationRule {
                source: old_file_start,
                destination: new_file_start,
                length: length as u32,
            },
        );
        self.rules_for_file.insert(new_file_start, keys_for_file);

        if let Some(count) = self.initial_token_count.remove(&old_file_start) {
            self.initial_token_count.insert(new_file_start, count);
        }
    }

    /// Snapshot all current rules as one transformation.
    pub fn compile(&self) -> AddressSpaceTransformation {
        let rules: Vec<TransformationRule> = self.rules.values().copied().collect();
        AddressSpaceTransformation::new(&rules)
    }
}
