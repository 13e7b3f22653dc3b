//! Method resolution order computation.
//!
//! New-style types linearize their ancestors with the C3 merge. Classic classes have no
//! linearization of their own; their lookup order is a depth-first, left-to-right walk of the
//! bases, which is also what a classic base contributes when it appears among the bases of a
//! new-style type.

use super::{ClassLike, ClassRef};
use crate::exception::{ExcType, RunResult};

/// Merges linearizations with the C3 rule.
///
/// At each step the first head that does not appear in the tail of any list is taken and
/// removed from the front of every list. Returns `None` when no such head exists.
pub(crate) fn c3_merge<T: Clone + PartialEq>(mut sequences: Vec<Vec<T>>) -> Option<Vec<T>> {
    let mut result = Vec::new();
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }
        let next = sequences
            .iter()
            .map(|seq| &seq[0])
            .find(|candidate| !sequences.iter().any(|seq| seq[1..].contains(candidate)))?
            .clone();
        for seq in &mut sequences {
            if seq.first() == Some(&next) {
                seq.remove(0);
            }
        }
        result.push(next);
    }
}

/// Computes the MRO of a new type from its bases, excluding the type itself.
///
/// The merge inputs are the linearization of each base followed by the list of bases.
pub(crate) fn compute_mro(bases: &[ClassLike]) -> RunResult<Vec<ClassLike>> {
    let mut sequences: Vec<Vec<ClassLike>> = bases.iter().map(ClassLike::linearization).collect();
    sequences.push(bases.to_vec());
    c3_merge(sequences).ok_or_else(|| {
        let names: Vec<String> = bases.iter().map(|b| b.name().to_string()).collect();
        ExcType::type_error(format!(
            "Cannot create a consistent method resolution\norder (MRO) for bases {}",
            names.join(", ")
        ))
    })
}

/// Depth-first lookup order of a classic class, including the class itself.
///
/// A class reachable along several paths is listed at its first position only, which does
/// not change lookup results since the first match always wins.
pub(crate) fn classic_mro(cls: &ClassRef) -> Vec<ClassLike> {
    fn walk(cls: &ClassRef, out: &mut Vec<ClassLike>) {
        let entry = ClassLike::Classic(cls.clone());
        if out.contains(&entry) {
            return;
        }
        out.push(entry);
        for base in cls.bases().iter() {
            walk(base, out);
        }
    }
    let mut out = Vec::new();
    walk(cls, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    /// Linearizes a toy hierarchy given as `(name, bases)` pairs, parents first.
    fn linearize(hierarchy: &[(char, &[char])], target: char) -> Option<Vec<char>> {
        let bases = hierarchy.iter().find(|(name, _)| *name == target)?.1;
        let mut sequences = Vec::new();
        for base in bases {
            sequences.push(linearize(hierarchy, *base)?);
        }
        sequences.push(bases.to_vec());
        let mut result = vec![target];
        result.extend(c3_merge(sequences)?);
        Some(result)
    }

    #[test]
    fn diamond_is_linearized_left_to_right() {
        let hierarchy: &[(char, &[char])] = &[('O', &[]), ('A', &['O']), ('B', &['O']), ('C', &['A', 'B'])];
        assert_eq!(linearize(hierarchy, 'C'), Some(vec!['C', 'A', 'B', 'O']));
    }

    #[test]
    fn classic_textbook_example() {
        let hierarchy: &[(char, &[char])] = &[
            ('O', &[]),
            ('A', &['O']),
            ('B', &['O']),
            ('C', &['O']),
            ('D', &['O']),
            ('E', &['O']),
            ('K', &['A', 'B', 'C']),
            ('L', &['D', 'B', 'E']),
            ('M', &['K', 'L']),
        ];
        assert_eq!(
            linearize(hierarchy, 'M'),
            Some(vec!['M', 'K', 'A', 'L', 'D', 'B', 'C', 'E', 'O'])
        );
    }

    #[test]
    fn inconsistent_order_is_rejected() {
        let hierarchy: &[(char, &[char])] = &[
            ('O', &[]),
            ('A', &['O']),
            ('B', &['O']),
            ('X', &['A', 'B']),
            ('Y', &['B', 'A']),
            ('Z', &['X', 'Y']),
        ];
        assert_eq!(linearize(hierarchy, 'Z'), None);
    }

    proptest! {
        #[test]
        fn merge_is_deterministic(edges in prop::collection::vec(prop::collection::vec(0_usize..8, 0..3), 1..8)) {
            // Class `i` may only inherit from classes with a smaller index, which keeps the
            // generated graph acyclic.
            let mut lins: Vec<Option<Vec<usize>>> = Vec::new();
            for (i, raw) in edges.iter().enumerate() {
                let mut bases: Vec<usize> = raw.iter().filter(|b| **b < i).copied().collect();
                bases.dedup();
                let mut sequences: Vec<Vec<usize>> = Vec::new();
                let mut ok = true;
                for b in &bases {
                    match &lins[*b] {
                        Some(lin) => sequences.push(lin.clone()),
                        None => ok = false,
                    }
                }
                sequences.push(bases.clone());
                let first = if ok { c3_merge(sequences.clone()) } else { None };
                let second = if ok { c3_merge(sequences) } else { None };
                prop_assert_eq!(&first, &second);
                lins.push(first.map(|tail| {
                    let mut lin = vec![i];
                    lin.extend(tail);
                    lin
                }));
            }
        }
    }
}
