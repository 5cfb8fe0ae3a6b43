//! Sequentialization of parallel copies.
//!
//! Phi nodes of a block read their operands simultaneously on entry. Once the phis are
//! gone, the copies that replace them have to be emitted one after another, without
//! clobbering a source before every copy reading it executed. This is the algorithm of
//! Boissinot et al. ("Revisiting Out-of-SSA Translation for Correctness, Code Quality,
//! and Efficiency"): copies whose destination is no longer needed run first; when only
//! cycles remain, one location of a cycle is saved to a temporary, which unblocks the
//! rest of the cycle. A single temporary serves every cycle of the set, because each
//! cycle is fully resolved before the next one is broken.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::Hash,
};

use crate::Result;

/// A set of copies meant to execute simultaneously.
///
/// # Example
///
/// ```rust
/// use cilgen::codegen::ParallelCopy;
///
/// // (a, b) := (b, a)
/// let mut set = ParallelCopy::new();
/// set.add("a", "b");
/// set.add("b", "a");
///
/// let mut emitted = Vec::new();
/// let temps = set.sequentialize(|| Ok("t"), |dest, src| {
///     emitted.push((*dest, *src));
///     Ok(())
/// })?;
/// assert_eq!(temps, 1);
/// assert_eq!(emitted.len(), 3);
/// # Ok::<(), cilgen::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ParallelCopy<L> {
    copies: Vec<(L, L)>,
}

impl<L> Default for ParallelCopy<L> {
    fn default() -> Self {
        ParallelCopy { copies: Vec::new() }
    }
}

impl<L: Clone + Eq + Hash + fmt::Debug> ParallelCopy<L> {
    /// Creates an empty copy set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the copy `dest := src`; self copies are ignored
    pub fn add(&mut self, dest: L, src: L) {
        if dest != src {
            self.copies.push((dest, src));
        }
    }

    /// Number of copies in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    /// Returns true if the set holds no copies
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// The copies as `(dest, src)` pairs, in insertion order
    #[must_use]
    pub fn copies(&self) -> &[(L, L)] {
        &self.copies
    }

    /// Emits the copies in an order equivalent to executing them simultaneously.
    ///
    /// `make_temp` is called at most once, the first time a cycle has to be broken.
    /// Returns the number of temporaries used (0 or 1).
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if two copies write the same
    /// destination, and forwards errors of the callbacks.
    pub fn sequentialize<T, E>(&self, mut make_temp: T, mut emit_copy: E) -> Result<usize>
    where
        T: FnMut() -> Result<L>,
        E: FnMut(&L, &L) -> Result<()>,
    {
        match self.copies.as_slice() {
            [] => return Ok(0),
            [(dest, src)] => {
                emit_copy(dest, src)?;
                return Ok(0);
            }
            _ => {}
        }

        // pred[d]: required source of d, loc[s]: where the value originally in s lives now
        let mut pred: HashMap<L, L> = HashMap::with_capacity(self.copies.len());
        let mut loc: HashMap<L, L> = HashMap::with_capacity(self.copies.len());
        for (dest, src) in &self.copies {
            if pred.insert(dest.clone(), src.clone()).is_some() {
                return Err(invariant_error!("parallel copy writes {:?} twice", dest));
            }
            loc.insert(src.clone(), src.clone());
        }

        let mut ready: Vec<L> = Vec::new();
        let mut todo: Vec<L> = Vec::new();
        for (dest, _) in self.copies.iter().rev() {
            todo.push(dest.clone());
            if !loc.contains_key(dest) {
                ready.push(dest.clone());
            }
        }

        let mut temp: Option<L> = None;
        let mut written: HashSet<L> = HashSet::with_capacity(self.copies.len());

        while !todo.is_empty() {
            while let Some(dest) = ready.pop() {
                let Some(src) = pred.get(&dest).cloned() else {
                    continue;
                };
                let Some(current) = loc.get(&src).cloned() else {
                    return Err(invariant_error!("lost track of {:?}", src));
                };
                emit_copy(&dest, &current)?;
                written.insert(dest.clone());
                loc.insert(src.clone(), dest);
                if current == src && pred.contains_key(&src) && !written.contains(&src) {
                    ready.push(src);
                }
            }

            let Some(dest) = todo.pop() else {
                break;
            };
            if written.contains(&dest) {
                continue;
            }

            // Only cycles are left: save dest and let the cycle drain through it
            let scratch = match &temp {
                Some(t) => t.clone(),
                None => {
                    let t = make_temp()?;
                    temp = Some(t.clone());
                    t
                }
            };
            emit_copy(&scratch, &dest)?;
            loc.insert(dest.clone(), scratch);
            ready.push(dest);
        }

        Ok(usize::from(temp.is_some()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs the sequence on a model register file and checks it against simultaneous
    /// assignment.
    fn check(copies: &[(u32, u32)]) -> usize {
        const TEMP: u32 = 1000;
        let mut set = ParallelCopy::new();
        for &(dest, src) in copies {
            set.add(dest, src);
        }

        let mut regs: HashMap<u32, u64> = HashMap::new();
        for &(dest, src) in copies {
            regs.insert(dest, 100 + u64::from(dest));
            regs.insert(src, 100 + u64::from(src));
        }
        let mut expected = regs.clone();
        for &(dest, src) in copies {
            expected.insert(dest, regs[&src]);
        }

        let mut temps_made = 0;
        let mut emitted = 0;
        let temps = set
            .sequentialize(
                || {
                    temps_made += 1;
                    Ok(TEMP)
                },
                |dest, src| {
                    let value = regs[src];
                    regs.insert(*dest, value);
                    emitted += 1;
                    Ok(())
                },
            )
            .unwrap();

        regs.remove(&TEMP);
        assert_eq!(regs, expected, "copies {copies:?}");
        assert!(temps_made <= 1);
        assert_eq!(temps, temps_made);
        emitted
    }

    #[test]
    fn test_swap_uses_one_temp() {
        assert_eq!(check(&[(1, 2), (2, 1)]), 3);
    }

    #[test]
    fn test_chain_needs_no_temp() {
        // c := b, b := a, d := c
        assert_eq!(check(&[(3, 2), (2, 1), (4, 3)]), 3);
    }

    #[test]
    fn test_fan_out() {
        assert_eq!(check(&[(2, 1), (3, 1), (4, 1)]), 3);
    }

    #[test]
    fn test_chain_into_cycle() {
        // x := y while y and z swap: x drains y first, no temporary needed
        assert_eq!(check(&[(1, 2), (2, 3), (3, 2)]), 3);
    }

    #[test]
    fn test_two_cycles_share_temp() {
        assert_eq!(check(&[(1, 2), (2, 3), (3, 1), (5, 6), (6, 5)]), 7);
    }

    #[test]
    fn test_self_copy_dropped() {
        let mut set = ParallelCopy::new();
        set.add(1u32, 1u32);
        assert!(set.is_empty());
        assert_eq!(check(&[(1, 1), (2, 1)]), 1);
    }

    #[test]
    fn test_duplicate_destination_rejected() {
        let mut set = ParallelCopy::new();
        set.add(1u32, 2u32);
        set.add(1u32, 3u32);
        let result = set.sequentialize(|| Ok(99), |_, _| Ok(()));
        assert!(result.unwrap_err().is_bug());
    }

    #[test]
    fn test_permutations() {
        // Every permutation of 5 locations, as a parallel assignment
        fn permute(items: &mut Vec<u32>, k: usize, out: &mut Vec<Vec<u32>>) {
            if k == items.len() {
                out.push(items.clone());
                return;
            }
            for i in k..items.len() {
                items.swap(k, i);
                permute(items, k + 1, out);
                items.swap(k, i);
            }
        }
        let mut all = Vec::new();
        permute(&mut vec![0, 1, 2, 3, 4], 0, &mut all);
        assert_eq!(all.len(), 120);

        for perm in all {
            let copies: Vec<(u32, u32)> = perm
                .iter()
                .enumerate()
                .map(|(dest, &src)| (dest as u32, src))
                .filter(|(d, s)| d != s)
                .collect();
            let emitted = check(&copies);
            assert!(emitted <= copies.len() + copies.len() / 2);
        }
    }
}
