//! Linear maps recorded while evaluating a differentiated body.
//!
//! Each executed basic block leaves a [`BlockRecord`] of entries, one per
//! active instruction. The pullback walks the records backwards with one
//! adjoint per local; the differential walks them forwards with one
//! tangent per local. Loops replay their blocks, so a loop body leaves one
//! record per iteration.

use super::ir::{BlockId, Local};
use super::module::{CustomDifferential, CustomPullback};
use super::value::{RuntimeError, Tangent};
use crate::live::LiveToken;
use std::fmt;

/// One linear step of a derivative program.
pub(crate) enum Entry {
    /// `dst` no longer depends on the differentiation arguments.
    Zero { dst: Local },
    /// `dst = sum(k * src)`, with the partials evaluated at the
    /// recorded point.
    Linear { dst: Local, terms: Vec<(Local, f64)> },
    /// Tuple or struct construction. `None` components carry no
    /// derivative.
    Aggregate { dst: Local, elements: Vec<Option<Local>> },
    Extract { dst: Local, base: Local, path: Vec<usize>, arities: Vec<usize> },
    /// `target.path = value`, where a `None` value writes a zero.
    Assign { target: Local, path: Vec<usize>, arities: Vec<usize>, value: Option<Local> },
    WrapSome { dst: Local, value: Local },
    UnwrapSome { dst: Local, optional: Local },
    /// A nested call; `args` pairs callee parameter indices with the
    /// caller locals passed to them.
    Call { dst: Local, args: Vec<(usize, Local)>, arity: usize, map: Linearization },
}

impl Entry {
    fn transpose(&self, adjoints: &mut [Tangent]) -> Result<(), RuntimeError> {
        match self {
            Entry::Zero { dst } => {
                adjoints[dst.0] = Tangent::Zero;
            }
            Entry::Linear { dst, terms } => {
                let seed = std::mem::take(&mut adjoints[dst.0]);
                for (src, k) in terms {
                    adjoints[src.0].accumulate(seed.scaled(*k))?;
                }
            }
            Entry::Aggregate { dst, elements } => {
                let seed = std::mem::take(&mut adjoints[dst.0]);
                for (i, element) in elements.iter().enumerate() {
                    if let Some(local) = element {
                        adjoints[local.0].accumulate(seed.project(&[i])?)?;
                    }
                }
            }
            Entry::Extract { dst, base, path, arities } => {
                let seed = std::mem::take(&mut adjoints[dst.0]);
                adjoints[base.0].accumulate(Tangent::embedded(path, arities, seed)?)?;
            }
            Entry::Assign { target, path, value, .. } => {
                let slot = adjoints[target.0].take_at(path)?;
                if let Some(value) = value {
                    adjoints[value.0].accumulate(slot)?;
                }
            }
            Entry::WrapSome { dst, value } => match std::mem::take(&mut adjoints[dst.0]) {
                Tangent::Optional(Some(inner)) => adjoints[value.0].accumulate(*inner)?,
                Tangent::Zero | Tangent::Optional(None) => {}
                other => {
                    return Err(RuntimeError::TangentShape(format!(
                        "expected an optional tangent, got {other:?}"
                    )))
                }
            },
            Entry::UnwrapSome { dst, optional } => {
                let seed = std::mem::take(&mut adjoints[dst.0]);
                if !matches!(seed, Tangent::Zero) {
                    adjoints[optional.0].accumulate(Tangent::Optional(Some(Box::new(seed))))?;
                }
            }
            Entry::Call { dst, args, map, .. } => {
                let seed = std::mem::take(&mut adjoints[dst.0]);
                let grads = map.pullback(seed)?;
                for (index, local) in args {
                    let grad = grads.get(*index).cloned().ok_or_else(|| {
                        RuntimeError::TangentShape(format!(
                            "pullback of '{}' returned {} tangents, needed index {index}",
                            map.name(),
                            grads.len()
                        ))
                    })?;
                    adjoints[local.0].accumulate(grad)?;
                }
            }
        }
        Ok(())
    }

    fn apply(&self, tangents: &mut [Tangent]) -> Result<(), RuntimeError> {
        match self {
            Entry::Zero { dst } => {
                tangents[dst.0] = Tangent::Zero;
            }
            Entry::Linear { dst, terms } => {
                let mut sum = Tangent::Zero;
                for (src, k) in terms {
                    sum.accumulate(tangents[src.0].scaled(*k))?;
                }
                tangents[dst.0] = sum;
            }
            Entry::Aggregate { dst, elements } => {
                let components: Vec<Tangent> = elements
                    .iter()
                    .map(|element| element.map_or(Tangent::Zero, |local| tangents[local.0].clone()))
                    .collect();
                tangents[dst.0] = Tangent::Aggregate(components);
            }
            Entry::Extract { dst, base, path, .. } => {
                tangents[dst.0] = tangents[base.0].project(path)?;
            }
            Entry::Assign { target, path, arities, value } => {
                let component = value.map_or(Tangent::Zero, |local| tangents[local.0].clone());
                tangents[target.0].set_at(path, arities, component)?;
            }
            Entry::WrapSome { dst, value } => {
                tangents[dst.0] = Tangent::Optional(Some(Box::new(tangents[value.0].clone())));
            }
            Entry::UnwrapSome { dst, optional } => {
                tangents[dst.0] = match &tangents[optional.0] {
                    Tangent::Optional(Some(inner)) => (**inner).clone(),
                    _ => Tangent::Zero,
                };
            }
            Entry::Call { dst, args, arity, map } => {
                let mut inputs = vec![Tangent::Zero; *arity];
                for (index, local) in args {
                    if let Some(input) = inputs.get_mut(*index) {
                        *input = tangents[local.0].clone();
                    }
                }
                tangents[dst.0] = map.differential(&inputs)?;
            }
        }
        Ok(())
    }
}

/// The entries of one executed basic block.
pub(crate) struct BlockRecord {
    pub(crate) block: BlockId,
    pub(crate) entries: Vec<Entry>,
    _token: LiveToken,
}

impl BlockRecord {
    pub(crate) fn new(block: BlockId, entries: Vec<Entry>) -> Self {
        Self {
            block,
            entries,
            _token: LiveToken::new(),
        }
    }
}

enum Map {
    Derived {
        arity: usize,
        wrt: Vec<usize>,
        locals: usize,
        result: Local,
        records: Vec<BlockRecord>,
    },
    Pullback(CustomPullback),
    Differential(CustomDifferential),
}

/// The linear map of a function at a point.
///
/// Depending on how it was obtained it runs backwards
/// ([`pullback`](Self::pullback)), forwards
/// ([`differential`](Self::differential)) or both. Tangent vectors have
/// one component per parameter of the function; parameters outside the
/// differentiation set get [`Tangent::Zero`].
pub struct Linearization {
    name: String,
    map: Map,
}

impl Linearization {
    pub(crate) fn derived(
        name: &str,
        arity: usize,
        wrt: &[usize],
        locals: usize,
        result: Local,
        records: Vec<BlockRecord>,
    ) -> Self {
        Self {
            name: name.to_string(),
            map: Map::Derived {
                arity,
                wrt: wrt.to_vec(),
                locals,
                result,
                records,
            },
        }
    }

    pub(crate) fn custom_pullback(name: &str, pullback: CustomPullback) -> Self {
        Self {
            name: name.to_string(),
            map: Map::Pullback(pullback),
        }
    }

    pub(crate) fn custom_differential(name: &str, differential: CustomDifferential) -> Self {
        Self {
            name: name.to_string(),
            map: Map::Differential(differential),
        }
    }

    /// Name of the linearized function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of block records, counting nested calls.
    pub fn record_count(&self) -> usize {
        match &self.map {
            Map::Derived { records, .. } => records
                .iter()
                .map(|record| {
                    1 + record
                        .entries
                        .iter()
                        .map(|entry| match entry {
                            Entry::Call { map, .. } => map.record_count(),
                            _ => 0,
                        })
                        .sum::<usize>()
                })
                .sum(),
            Map::Pullback(_) | Map::Differential(_) => 0,
        }
    }

    /// Maps a result cotangent to one cotangent per parameter.
    pub fn pullback(&self, seed: Tangent) -> Result<Vec<Tangent>, RuntimeError> {
        match &self.map {
            Map::Derived {
                arity,
                wrt,
                locals,
                result,
                records,
            } => {
                let mut adjoints = vec![Tangent::Zero; *locals];
                adjoints[result.0] = seed;
                for record in records.iter().rev() {
                    for entry in record.entries.iter().rev() {
                        entry.transpose(&mut adjoints)?;
                    }
                }
                Ok((0..*arity)
                    .map(|i| {
                        if wrt.contains(&i) {
                            std::mem::take(&mut adjoints[i])
                        } else {
                            Tangent::Zero
                        }
                    })
                    .collect())
            }
            Map::Pullback(pullback) => pullback(seed),
            Map::Differential(_) => Err(RuntimeError::MissingPullback(self.name.clone())),
        }
    }

    /// Maps one tangent per parameter to the result tangent.
    pub fn differential(&self, inputs: &[Tangent]) -> Result<Tangent, RuntimeError> {
        match &self.map {
            Map::Derived {
                arity,
                wrt,
                locals,
                result,
                records,
            } => {
                if inputs.len() != *arity {
                    return Err(RuntimeError::Arity {
                        function: self.name.clone(),
                        expected: *arity,
                        found: inputs.len(),
                    });
                }
                let mut tangents = vec![Tangent::Zero; *locals];
                for &i in wrt {
                    tangents[i] = inputs[i].clone();
                }
                for record in records {
                    for entry in &record.entries {
                        entry.apply(&mut tangents)?;
                    }
                }
                Ok(std::mem::take(&mut tangents[result.0]))
            }
            Map::Differential(differential) => differential(inputs),
            Map::Pullback(_) => Err(RuntimeError::MissingDifferential(self.name.clone())),
        }
    }
}

impl fmt::Debug for Linearization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.map {
            Map::Derived { .. } => "derived",
            Map::Pullback(_) => "custom pullback",
            Map::Differential(_) => "custom differential",
        };
        f.debug_struct("Linearization")
            .field("name", &self.name)
            .field("kind", &kind)
            .field("records", &self.record_count())
            .finish()
    }
}
