//! Block layout.
//!
//! Orders the blocks of a method for emission. The traversal is a depth-first search with
//! an explicit LIFO worklist, so the successor pushed last is laid out right after its
//! predecessor and the edge between them becomes a fallthrough. The "then" arm of a
//! conditional branch and the default target of a switch are preferred.
//!
//! Protected regions have to occupy contiguous ranges. When the traversal reaches a block
//! opening regions, the handler (and filter) entries of all its guards are reserved so the
//! outer traversal cannot claim them, the shared try body is laid out with its own
//! worklist, then the filter and handler of each clause in guard order. Edges leaving the region (`leave`, `endfinally`) are handed to the
//! worklist of the traversal that reached the region. A `leave` crossing several regions
//! therefore lands in the immediately enclosing traversal.

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
};

use crate::{
    ir::{BlockId, GuardKind, InstId, InstKind, MethodBody},
    Result,
};

/// A protected region as ranges into [`BlockLayout::order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRegion {
    /// The guard opening the region
    pub guard: InstId,
    /// Clause kind
    pub kind: GuardKind,
    /// Blocks of the try body
    pub try_range: Range<usize>,
    /// Blocks of the filter, for filter clauses
    pub filter_range: Option<Range<usize>>,
    /// Blocks of the handler
    pub handler_range: Range<usize>,
}

/// Emission order of the blocks of a method plus its region table.
#[derive(Debug, Clone, Default)]
pub struct BlockLayout {
    order: Vec<BlockId>,
    regions: Vec<LayoutRegion>,
    positions: HashMap<BlockId, usize>,
    entries: HashMap<BlockId, InstId>,
}

#[derive(Default)]
struct LayoutBuilder {
    order: Vec<BlockId>,
    regions: Vec<LayoutRegion>,
    placed: HashSet<BlockId>,
    reserved: HashMap<BlockId, InstId>,
}

impl LayoutBuilder {
    fn reserve(&mut self, guard: InstId, entry: BlockId) -> Result<()> {
        match self.reserved.insert(entry, guard) {
            Some(owner) if owner != guard => Err(invariant_error!(
                "{} is the handler entry of both {} and {}",
                entry,
                owner,
                guard
            )),
            _ if self.placed.contains(&entry) => Err(invariant_error!(
                "handler entry {} was reached by normal control flow",
                entry
            )),
            _ => Ok(()),
        }
    }

    fn drain(
        &mut self,
        body: &MethodBody,
        worklist: &mut Vec<BlockId>,
        exits: &mut Vec<BlockId>,
    ) -> Result<()> {
        while let Some(block) = worklist.pop() {
            if self.placed.contains(&block) || self.reserved.contains_key(&block) {
                continue;
            }
            self.place(body, block, true, worklist, exits)?;
        }
        Ok(())
    }

    /// Lays out a handler or filter body starting at its reserved entry.
    fn lay_out_entry(
        &mut self,
        body: &MethodBody,
        entry: BlockId,
        exits: &mut Vec<BlockId>,
    ) -> Result<Range<usize>> {
        if self.placed.contains(&entry) {
            return Err(invariant_error!("handler entry {} laid out twice", entry));
        }
        let start = self.order.len();
        let mut worklist = Vec::new();
        self.place(body, entry, true, &mut worklist, exits)?;
        self.drain(body, &mut worklist, exits)?;
        Ok(start..self.order.len())
    }

    /// Places `block`, first opening its guards when `open_guards` is set.
    fn place(
        &mut self,
        body: &MethodBody,
        block: BlockId,
        open_guards: bool,
        worklist: &mut Vec<BlockId>,
        exits: &mut Vec<BlockId>,
    ) -> Result<()> {
        let guards = body.guards(block);
        if open_guards && !guards.is_empty() {
            let mut clauses = Vec::with_capacity(guards.len());
            for guard in guards {
                let InstKind::Guard {
                    kind,
                    handler,
                    filter,
                } = body.inst(guard).kind().clone()
                else {
                    return Err(invariant_error!("{} is not a guard", guard));
                };
                if matches!(kind, GuardKind::Filter) != filter.is_some() {
                    return Err(invariant_error!("guard {} has a mismatched filter block", guard));
                }
                if let Some(f) = filter {
                    self.reserve(guard, f)?;
                }
                self.reserve(guard, handler)?;
                clauses.push((guard, kind, handler, filter));
            }

            // All clauses of the block protect the same try body
            let mut region_exits = Vec::new();
            let try_start = self.order.len();
            let mut inner = Vec::new();
            self.place(body, block, false, &mut inner, &mut region_exits)?;
            self.drain(body, &mut inner, &mut region_exits)?;
            let try_range = try_start..self.order.len();

            for (guard, kind, handler, filter) in clauses {
                let filter_range = match filter {
                    Some(f) => Some(self.lay_out_entry(body, f, &mut region_exits)?),
                    None => None,
                };
                let handler_range = self.lay_out_entry(body, handler, &mut region_exits)?;
                self.regions.push(LayoutRegion {
                    guard,
                    kind,
                    try_range: try_range.clone(),
                    filter_range,
                    handler_range,
                });
            }
            worklist.extend(region_exits.into_iter().rev());
            return Ok(());
        }

        self.placed.insert(block);
        self.order.push(block);

        let Some(term) = body.terminator(block) else {
            return Err(invariant_error!("block {} has no terminator", block));
        };
        let kind = body.inst(term).kind();
        let target = if kind.exits_region() { exits } else { worklist };
        match kind {
            InstKind::Switch { targets, default } => {
                for t in targets.iter().rev() {
                    target.push(*t);
                }
                target.push(*default);
            }
            _ => {
                for succ in kind.successors().into_iter().rev() {
                    target.push(succ);
                }
            }
        }
        Ok(())
    }
}

impl BlockLayout {
    /// Computes the layout of `body`.
    ///
    /// Blocks unreachable from the entry are left out.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvariantViolation`] if a handler entry is shared by two
    /// guards, reachable through normal control flow, or never laid out, or if a block has
    /// no terminator.
    pub fn compute(body: &MethodBody) -> Result<Self> {
        let mut builder = LayoutBuilder::default();
        let mut worklist = vec![body.entry()];
        let mut exits = Vec::new();
        loop {
            builder.drain(body, &mut worklist, &mut exits)?;
            if exits.is_empty() {
                break;
            }
            worklist.extend(exits.drain(..).rev());
        }

        for (entry, guard) in &builder.reserved {
            if !builder.placed.contains(entry) {
                return Err(invariant_error!(
                    "handler entry {} of {} was never laid out",
                    entry,
                    guard
                ));
            }
        }

        let positions = builder
            .order
            .iter()
            .enumerate()
            .map(|(i, &b)| (b, i))
            .collect();

        log::trace!(
            "{}: layout {:?}, {} regions",
            body.name(),
            builder.order,
            builder.regions.len()
        );
        Ok(BlockLayout {
            order: builder.order,
            regions: builder.regions,
            positions,
            entries: builder.reserved,
        })
    }

    /// Blocks in emission order
    #[must_use]
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// Regions, each one recorded after the regions nested in it
    #[must_use]
    pub fn regions(&self) -> &[LayoutRegion] {
        &self.regions
    }

    /// Position of `block` in the emission order
    #[must_use]
    pub fn position(&self, block: BlockId) -> Option<usize> {
        self.positions.get(&block).copied()
    }

    /// The block emitted right after `block`
    #[must_use]
    pub fn next_block(&self, block: BlockId) -> Option<BlockId> {
        self.position(block)
            .and_then(|p| self.order.get(p + 1))
            .copied()
    }

    /// The guard whose handler or filter starts at `block`
    #[must_use]
    pub fn handler_guard(&self, block: BlockId) -> Option<InstId> {
        self.entries.get(&block).copied()
    }
}
